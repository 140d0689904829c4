//! Headless frame loop over a synthetic volume.

use std::fmt;

use brickstream_cache::BrickCache;
use brickstream_core::{BrickAddress, NodeId};
use brickstream_octree::{BrickStore, ChannelStats, Octree, OctreeNode, RamBrickStore};
use brickstream_render::{Camera, FrameController, FrameInput, FrameOutcome, RenderState};
use glam::Vec3;

use crate::{HarnessConfig, Result, TestError};

/// Complete octree whose bricks are never uniform.
///
/// Each node owns a brick addressed by its arena index, filled with a
/// gradient offset by that index.
pub fn layered_volume(levels: u8, channels: u8, brick_dim: u32) -> Result<(Octree, RamBrickStore)> {
    fn build(
        nodes: &mut Vec<OctreeNode>,
        store: &mut RamBrickStore,
        level: u8,
        channels: usize,
        dim: u32,
    ) -> u32 {
        let children = (level > 0).then(|| {
            let mut children = [0; 8];
            for child in &mut children {
                *child = build(nodes, store, level - 1, channels, dim);
            }
            children
        });

        #[allow(clippy::cast_possible_truncation)]
        let index = nodes.len() as u32;
        let mut samples = Vec::with_capacity((dim * dim * dim) as usize * channels);
        for z in 0..dim {
            for y in 0..dim {
                for x in 0..dim {
                    #[allow(clippy::cast_possible_truncation)]
                    let base = ((x + y + z) * 1500 + index * 7) as u16;
                    #[allow(clippy::cast_possible_truncation)]
                    samples.extend((0..channels).map(|c| base.wrapping_add(c as u16 * 311)));
                }
            }
        }
        let stats = ChannelStats::from_samples(&samples, channels);
        let address = BrickAddress(u64::from(index));
        store.insert(address, samples);
        nodes.push(match children {
            Some(children) => OctreeNode::branch(stats, Some(address), children),
            None => OctreeNode::leaf(stats, address),
        });
        index
    }

    let mut nodes = Vec::new();
    let mut store = RamBrickStore::new();
    let root = build(
        &mut nodes,
        &mut store,
        levels.saturating_sub(1),
        usize::from(channels),
        brick_dim,
    );
    let octree = Octree::new(nodes, root, channels, brick_dim)?;
    Ok((octree, store))
}

/// One frame as the tests see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSummary {
    pub frame: u64,
    pub state: RenderState,
    pub admitted: usize,
    pub evicted: usize,
    pub forced_evictions: usize,
    pub deferred: usize,
    pub failures: usize,
    pub stalled: bool,
    pub occupied: usize,
}

impl FrameSummary {
    fn new(outcome: &FrameOutcome, occupied: usize) -> Self {
        let report = outcome.report.as_ref();
        Self {
            frame: outcome.frame,
            state: outcome.plan.state,
            admitted: outcome.admitted(),
            evicted: report.map_or(0, |r| r.evicted),
            forced_evictions: report.map_or(0, |r| r.forced_evictions),
            deferred: report.map_or(0, |r| r.deferred),
            failures: report.map_or(0, |r| r.failures.len()),
            stalled: report.is_some_and(|r| r.stalled),
            occupied,
        }
    }
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {:?}: +{} -{} deferred {} failed {} occupied {}",
            self.frame,
            self.state,
            self.admitted,
            self.evicted,
            self.deferred,
            self.failures,
            self.occupied
        )?;
        if self.stalled {
            write!(f, " (stalled)")?;
        }
        Ok(())
    }
}

/// Cache, controller and store for one synthetic volume.
pub struct Harness<S = RamBrickStore> {
    octree: Octree,
    store: S,
    cache: BrickCache,
    controller: FrameController,
    input: FrameInput,
}

impl Harness<RamBrickStore> {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let (octree, store) = layered_volume(config.levels, config.channels, config.brick_dim)?;
        let cache = BrickCache::new(&octree, config.cache)?;
        Ok(Self {
            octree,
            store,
            cache,
            controller: FrameController::new(config.render),
            input: FrameInput {
                interacting: false,
                viewport: config.viewport,
                camera: Camera::new(Vec3::new(0.5, 0.5, 1.8), Vec3::splat(0.5), 0.9),
            },
        })
    }
}

impl<S: BrickStore> Harness<S> {
    /// Swap the store for a wrapper around it.
    pub fn with_store<T: BrickStore>(self, wrap: impl FnOnce(S) -> T) -> Harness<T> {
        Harness {
            octree: self.octree,
            store: wrap(self.store),
            cache: self.cache,
            controller: self.controller,
            input: self.input,
        }
    }

    pub const fn octree(&self) -> &Octree {
        &self.octree
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn cache(&self) -> &BrickCache {
        &self.cache
    }

    pub const fn controller(&self) -> &FrameController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut FrameController {
        &mut self.controller
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.input.camera
    }

    pub fn set_interacting(&mut self, interacting: bool) {
        self.input.interacting = interacting;
    }

    /// Brick address behind a node buffer entry.
    pub fn address(&self, node: NodeId) -> Option<BrickAddress> {
        let index = self.cache.node_buffer().info(node).octree_index;
        self.octree.node(index).brick
    }

    /// Nodes currently holding a pool slot.
    pub fn resident(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.cache.pool().occupants().map(|(_, n)| n).collect();
        nodes.sort_unstable();
        nodes
    }

    /// Run one frame and check the cache afterwards.
    pub fn frame(&mut self) -> Result<FrameSummary> {
        let outcome =
            self.controller
                .begin_frame(&mut self.cache, &self.octree, &self.store, &self.input)?;
        self.cache.validate(&self.octree)?;
        let summary = FrameSummary::new(&outcome, self.cache.pool().occupied());
        tracing::debug!(%summary, "Harness frame");
        Ok(summary)
    }

    /// Run frames until nothing is left to do.
    pub fn run_until_finished(&mut self, max_frames: usize) -> Result<Vec<FrameSummary>> {
        let mut frames = Vec::new();
        for _ in 0..max_frames {
            frames.push(self.frame()?);
            if self.controller.is_finished() {
                return Ok(frames);
            }
        }
        Err(TestError::NotConverged { frames: max_frames })
    }
}
