//! CPU reference traversal.
//!
//! Marches one ray per pixel through the node buffer, composites samples
//! from resident bricks or node averages, and reports which nodes it needed
//! through the dispatch's flag bytes.

use brickstream_cache::{BrickSlotPool, Dispatch, NodeBuffer, NodeFlags, NodePayload};
use brickstream_core::{NodeId, SlotIndex};
use glam::{UVec2, Vec3};
use rayon::prelude::*;

use crate::camera::Camera;
use crate::ray_buffer::{RayBuffer, RayProgress};

/// Opacity at which a ray counts as saturated.
const OPAQUE: f32 = 0.99;

/// Ray through the unit-cube volume.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Point along the ray at distance t.
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Entry and exit distance through the unit cube.
    pub fn clip_unit_cube(&self) -> Option<(f32, f32)> {
        let inv = self.direction.recip();
        let t0 = (Vec3::ZERO - self.origin) * inv;
        let t1 = (Vec3::ONE - self.origin) * inv;
        let near = t0.min(t1).max_element().max(0.0);
        let far = t0.max(t1).min_element();
        (near < far).then_some((near, far))
    }
}

/// Per-pass traversal parameters.
#[derive(Debug, Clone, Copy)]
pub struct TraceSettings {
    /// Internal render size in pixels.
    pub render_size: UVec2,
    /// Depth below the root at which bricks are requested.
    pub target_depth: u8,
    /// Brick edge length in samples.
    pub brick_dim: u32,
    /// Samples per voxel of the target depth.
    pub sampling_rate: f32,
    /// Opacity contributed by a full-scale sample over one voxel.
    pub density: f32,
    /// Resume rays from the ray buffer instead of restarting them.
    pub resume: bool,
}

/// What one pass achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub rays: usize,
    pub resolved: usize,
    /// Rays that stopped at a missing brick.
    pub suspended: usize,
    pub samples: usize,
}

impl std::ops::Add for TraceStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            rays: self.rays + other.rays,
            resolved: self.resolved + other.resolved,
            suspended: self.suspended + other.suspended,
            samples: self.samples + other.samples,
        }
    }
}

/// Ray basis derived from the camera.
struct Frustum {
    origin: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    size: UVec2,
}

impl Frustum {
    fn new(camera: &Camera, size: UVec2) -> Self {
        let forward = (camera.target - camera.position).normalize_or_zero();
        let forward = if forward == Vec3::ZERO { Vec3::NEG_Z } else { forward };
        let right = forward.cross(Vec3::Y).try_normalize().unwrap_or(Vec3::X);
        let up = right.cross(forward);
        let tan = (camera.fov * 0.5).tan();
        #[allow(clippy::cast_precision_loss)]
        let aspect = size.x.max(1) as f32 / size.y.max(1) as f32;
        Self {
            origin: camera.position,
            forward,
            right: right * tan * aspect,
            up: up * tan,
            size,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn ray(&self, pixel: UVec2) -> Ray {
        let ndc_x = (pixel.x as f32 + 0.5) / self.size.x as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (pixel.y as f32 + 0.5) / self.size.y as f32 * 2.0;
        Ray::new(self.origin, self.forward + self.right * ndc_x + self.up * ndc_y)
    }
}

/// Sample source chosen for a point.
enum Source {
    Brick(SlotIndex),
    Average(u16),
    /// Needed brick is missing and no ancestor can stand in.
    Missing,
}

/// Read-only view of the buffers a pass walks.
struct Walker<'a> {
    nodes: &'a NodeBuffer,
    pool: &'a BrickSlotPool,
    settings: TraceSettings,
    channels: usize,
}

impl Walker<'_> {
    /// Descend to the node covering `p`, marking every node on the way.
    ///
    /// Returns the node and the origin and edge length of its region.
    fn descend(&self, p: Vec3, flags: &mut [u8]) -> (NodeId, Vec3, f32) {
        let mut node = NodeId::ROOT;
        let mut origin = Vec3::ZERO;
        let mut size = 1.0;
        let mut depth = 0;
        loop {
            flags[node.index()] |= NodeFlags::TRAVERSED.bits();
            let Some(children) = self.nodes.children(node) else {
                break;
            };
            if depth == self.settings.target_depth {
                break;
            }
            size *= 0.5;
            let local = (p - origin) / size;
            let mut octant = 0;
            if local.x >= 1.0 {
                octant |= 1;
                origin.x += size;
            }
            if local.y >= 1.0 {
                octant |= 2;
                origin.y += size;
            }
            if local.z >= 1.0 {
                octant |= 4;
                origin.z += size;
            }
            node = NodeId(children.start + octant);
            depth += 1;
        }
        (node, origin, size)
    }

    /// Pick what to sample for a node and flag it accordingly.
    fn source(&self, node: NodeId, flags: &mut [u8]) -> (Source, NodeId) {
        let descriptor = self.nodes.descriptor(node);
        match descriptor.payload {
            NodePayload::Brick(slot) => {
                flags[node.index()] |= NodeFlags::USED.bits();
                return (Source::Brick(slot), node);
            }
            NodePayload::Average(avg) if descriptor.homogeneous => {
                return (Source::Average(avg[0]), node);
            }
            NodePayload::Average(_) => {}
        }

        flags[node.index()] |= NodeFlags::REQUESTED.bits();
        let mut ancestor = self.nodes.info(node).parent;
        while let Some(id) = ancestor {
            if let Some(slot) = self.nodes.slot(id) {
                flags[id.index()] |= NodeFlags::USED.bits();
                return (Source::Brick(slot), id);
            }
            ancestor = self.nodes.info(id).parent;
        }
        (Source::Missing, node)
    }

    /// First channel of the brick sample nearest to `p`.
    fn brick_sample(&self, slot: SlotIndex, p: Vec3, origin: Vec3, size: f32) -> u16 {
        let dim = self.settings.brick_dim;
        #[allow(clippy::cast_precision_loss)]
        let scale = dim as f32 / size;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let voxel = ((p - origin) * scale)
            .as_uvec3()
            .min(glam::UVec3::splat(dim - 1));
        let index = ((voxel.z * dim + voxel.y) * dim + voxel.x) as usize * self.channels;
        self.pool.slot_data(slot).get(index).copied().unwrap_or(0)
    }

    /// Region of an ancestor that stands in for a node.
    fn region_of(&self, node: NodeId, stand_in: NodeId, origin: Vec3, size: f32) -> (Vec3, f32) {
        let mut size = size;
        let mut current = node;
        while current != stand_in {
            size *= 2.0;
            match self.nodes.info(current).parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        // Ancestor regions are aligned to their own size.
        ((origin / size).floor() * size, size)
    }

    /// Trace or resume one ray.
    fn trace(&self, ray: &Ray, progress: &mut RayProgress, flags: &mut [u8]) -> TraceStats {
        let mut stats = TraceStats {
            rays: 1,
            ..TraceStats::default()
        };
        if self.settings.resume && progress.is_resolved() {
            stats.resolved = 1;
            return stats;
        }
        if !self.settings.resume {
            *progress = RayProgress::START;
        }

        let Some((enter, exit)) = ray.clip_unit_cube() else {
            progress.status = RayProgress::RESOLVED;
            stats.resolved = 1;
            return stats;
        };

        #[allow(clippy::cast_precision_loss)]
        let voxels = self.settings.brick_dim as f32 * f32::from(1u16 << self.settings.target_depth.min(15));
        let step = 1.0 / (voxels * self.settings.sampling_rate.max(0.01));
        let opacity_scale = self.settings.density * step * voxels;
        let mut t = progress.t.max(enter);

        while t < exit {
            let p = ray.at(t).clamp(Vec3::ZERO, Vec3::splat(1.0 - f32::EPSILON));
            let (node, origin, size) = self.descend(p, flags);
            let (source, stand_in) = self.source(node, flags);
            let substituted = stand_in != node || matches!(source, Source::Missing);
            if substituted && self.settings.resume {
                // Refinement passes wait for the real brick.
                progress.t = t;
                stats.suspended = 1;
                return stats;
            }
            let value = match source {
                Source::Brick(slot) if stand_in == node => self.brick_sample(slot, p, origin, size),
                Source::Brick(slot) => {
                    let (origin, size) = self.region_of(node, stand_in, origin, size);
                    self.brick_sample(slot, p, origin, size)
                }
                Source::Average(value) => value,
                Source::Missing => 0,
            };

            stats.samples += 1;
            let density = f32::from(value) / f32::from(u16::MAX);
            let alpha = (density * opacity_scale).min(1.0);
            if alpha > 0.0 {
                let weight = (1.0 - progress.color[3]) * alpha;
                if progress.color[3] == 0.0 {
                    progress.first_hit_depth = (t - enter) / (exit - enter).max(f32::EPSILON);
                }
                for channel in &mut progress.color[..3] {
                    *channel += weight * density;
                }
                progress.color[3] += weight;
            }
            progress.last_depth = (t - enter) / (exit - enter).max(f32::EPSILON);
            t += step;
            if progress.color[3] >= OPAQUE {
                break;
            }
        }

        progress.t = t;
        progress.status = RayProgress::RESOLVED;
        stats.resolved = 1;
        stats
    }
}

/// Run one pass over every pixel of the ray buffer.
///
/// Flags are merged into the dispatch; completing the dispatch is left to
/// the caller.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn trace_pass(
    dispatch: &mut Dispatch<'_>,
    camera: &Camera,
    rays: &mut RayBuffer,
    settings: TraceSettings,
) -> TraceStats {
    rays.resize(settings.render_size);
    let frustum = Frustum::new(camera, settings.render_size);
    let nodes = dispatch.node_buffer();
    let walker = Walker {
        nodes,
        pool: dispatch.pool(),
        settings,
        channels: usize::from(nodes.codec().channels()),
    };
    let width = settings.render_size.x.max(1) as usize;
    let node_count = nodes.len();

    let (marks, stats) = rays
        .rays_mut()
        .par_iter_mut()
        .enumerate()
        .fold(
            || (vec![0u8; node_count], TraceStats::default()),
            |(mut marks, stats), (index, progress)| {
                #[allow(clippy::cast_possible_truncation)]
                let pixel = UVec2::new((index % width) as u32, (index / width) as u32);
                let ray = frustum.ray(pixel);
                let traced = walker.trace(&ray, progress, &mut marks);
                (marks, stats + traced)
            },
        )
        .reduce(
            || (vec![0u8; node_count], TraceStats::default()),
            |(mut a, sa), (b, sb)| {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x |= *y;
                }
                (a, sa + sb)
            },
        );

    for (flag, mark) in dispatch.flags_mut().iter_mut().zip(&marks) {
        *flag |= *mark;
    }
    tracing::trace!(
        rays = stats.rays,
        resolved = stats.resolved,
        suspended = stats.suspended,
        "Traversal pass"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickstream_cache::{BrickCache, CacheConfig, DispatchMode, PoolCapacity, UploadBudget};
    use brickstream_octree::{VolumeConfig, VolumeGenerator};

    fn settings(resume: bool) -> TraceSettings {
        TraceSettings {
            render_size: UVec2::new(16, 12),
            target_depth: 2,
            brick_dim: 4,
            sampling_rate: 1.0,
            density: 0.05,
            resume,
        }
    }

    fn volume() -> (brickstream_octree::Octree, brickstream_octree::RamBrickStore) {
        VolumeGenerator::new(VolumeConfig {
            seed: 7,
            levels: 3,
            brick_dim: 4,
            threshold: 0,
            ..VolumeConfig::default()
        })
        .generate()
        .unwrap()
    }

    #[test]
    fn ray_clips_against_unit_cube() {
        let ray = Ray::new(Vec3::new(0.5, 0.5, 3.0), Vec3::NEG_Z);
        let (near, far) = ray.clip_unit_cube().unwrap();
        assert!((near - 2.0).abs() < 1e-5);
        assert!((far - 3.0).abs() < 1e-5);

        let miss = Ray::new(Vec3::new(5.0, 5.0, 3.0), Vec3::NEG_Z);
        assert!(miss.clip_unit_cube().is_none());
    }

    #[test]
    fn cold_cache_requests_and_completes_rays() {
        let (octree, _) = volume();
        let mut cache = BrickCache::new(
            &octree,
            CacheConfig {
                pool: PoolCapacity::Slots(64),
                upload: UploadBudget::UNLIMITED,
            },
        )
        .unwrap();
        let mut rays = RayBuffer::new(UVec2::ZERO);

        let mut dispatch = cache.begin_dispatch(DispatchMode::FullFrame);
        let stats = trace_pass(&mut dispatch, &Camera::default(), &mut rays, settings(false));
        let flags = dispatch.flags().analyze();
        dispatch.complete();

        assert_eq!(stats.rays, 16 * 12);
        assert_eq!(stats.resolved, stats.rays);
        assert!(flags.traversed > 0);
        assert!(flags.requested > 0);
        assert_eq!(flags.used, 0);
        assert!(cache.flags().get(NodeId::ROOT).contains(NodeFlags::TRAVERSED));
    }

    #[test]
    fn refinement_suspends_on_missing_bricks() {
        let (octree, store) = volume();
        let mut cache = BrickCache::new(
            &octree,
            CacheConfig {
                pool: PoolCapacity::Slots(128),
                upload: UploadBudget::UNLIMITED,
            },
        )
        .unwrap();
        let mut rays = RayBuffer::new(UVec2::ZERO);

        // Root only: every finer request suspends a resuming ray.
        let mut dispatch = cache.begin_dispatch(DispatchMode::FullFrame);
        dispatch.flags_mut()[0] = (NodeFlags::REQUESTED | NodeFlags::TRAVERSED).bits();
        dispatch.complete();
        cache.update(&octree, &store, None).unwrap();

        let mut dispatch = cache.begin_dispatch(DispatchMode::Refinement);
        let stats = trace_pass(&mut dispatch, &Camera::default(), &mut rays, settings(true));
        dispatch.complete();
        assert!(stats.suspended > 0);
        assert_eq!(stats.suspended + stats.resolved, stats.rays);

        // Passes converge once everything requested is resident.
        let mut last = stats;
        for _ in 0..16 {
            cache.update(&octree, &store, None).unwrap();
            let mut dispatch = cache.begin_dispatch(DispatchMode::Refinement);
            last = trace_pass(&mut dispatch, &Camera::default(), &mut rays, settings(true));
            dispatch.complete();
        }
        assert_eq!(last.suspended, 0);
        assert_eq!(rays.unresolved(), 0);
    }
}
