//! Synthetic volume generation.
//!
//! Produces a complete multiresolution octree from fractal noise so the
//! cache can be exercised without an external dataset.

use brickstream_core::constants::CHILDREN;
use brickstream_core::{BrickAddress, Result};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;

use crate::node::{ChannelStats, OctreeNode};
use crate::octree::Octree;
use crate::store::RamBrickStore;

/// Synthetic volume configuration.
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    /// Seed for noise generation.
    pub seed: u32,
    /// Number of octree levels (root included).
    pub levels: u8,
    /// Channels per sample (1..=4).
    pub channels: u8,
    /// Brick edge length in samples.
    pub brick_dim: u32,
    /// Base noise frequency over the unit cube.
    pub frequency: f64,
    /// Number of noise octaves.
    pub octaves: usize,
    /// Samples below this value are clamped to zero, carving out empty space.
    pub threshold: u16,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            levels: 4,
            channels: 1,
            brick_dim: 8,
            frequency: 3.0,
            octaves: 3,
            threshold: 30000,
        }
    }
}

#[derive(Clone, Copy)]
struct Region {
    origin: [f64; 3],
    size: f64,
    parent: Option<(u32, usize)>,
}

impl Region {
    fn child(&self, index: u32, octant: usize) -> Self {
        let half = self.size * 0.5;
        let offset = |bit: usize| if octant & bit != 0 { half } else { 0.0 };
        Self {
            origin: [
                self.origin[0] + offset(1),
                self.origin[1] + offset(2),
                self.origin[2] + offset(4),
            ],
            size: half,
            parent: Some((index, octant)),
        }
    }
}

/// Fractal-noise volume generator.
pub struct VolumeGenerator {
    config: VolumeConfig,
    noise: Fbm<Perlin>,
}

impl VolumeGenerator {
    /// Create a new generator with the given configuration.
    pub fn new(config: VolumeConfig) -> Self {
        let noise = Fbm::<Perlin>::new(config.seed)
            .set_octaves(config.octaves)
            .set_lacunarity(2.0)
            .set_persistence(0.5);
        Self { config, noise }
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Sample one channel at a point of the unit cube.
    pub fn sample(&self, point: [f64; 3], channel: usize) -> u16 {
        let f = self.config.frequency;
        #[allow(clippy::cast_precision_loss)]
        let shift = channel as f64 * 17.31;
        let v = self
            .noise
            .get([point[0] * f + shift, point[1] * f, point[2] * f - shift]);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = ((v * 0.5 + 0.5).clamp(0.0, 1.0) * f64::from(u16::MAX)) as u16;
        if scaled < self.config.threshold {
            0
        } else {
            scaled
        }
    }

    /// Sample a brick covering a region, channels interleaved, x fastest.
    fn sample_brick(&self, region: &Region) -> Vec<u16> {
        let dim = self.config.brick_dim;
        let channels = usize::from(self.config.channels);
        let step = region.size / f64::from(dim);
        let mut samples = Vec::with_capacity((dim * dim * dim) as usize * channels);

        for z in 0..dim {
            for y in 0..dim {
                for x in 0..dim {
                    let p = [
                        region.origin[0] + (f64::from(x) + 0.5) * step,
                        region.origin[1] + (f64::from(y) + 0.5) * step,
                        region.origin[2] + (f64::from(z) + 0.5) * step,
                    ];
                    samples.extend((0..channels).map(|c| self.sample(p, c)));
                }
            }
        }
        samples
    }

    /// Build the octree and its brick store.
    ///
    /// Every non-uniform node gets a brick; uniform regions become
    /// homogeneous leaves at whatever level they are found.
    pub fn generate(&self) -> Result<(Octree, RamBrickStore)> {
        let channels = usize::from(self.config.channels);
        let mut nodes: Vec<OctreeNode> = Vec::new();
        let mut store = RamBrickStore::new();
        let mut frontier = vec![Region {
            origin: [0.0; 3],
            size: 1.0,
            parent: None,
        }];

        for level in (0..self.config.levels).rev() {
            let _span = tracing::debug_span!("generate_level", level, regions = frontier.len()).entered();

            let sampled: Vec<(Region, Vec<u16>)> = frontier
                .into_par_iter()
                .map(|region| {
                    let samples = self.sample_brick(&region);
                    (region, samples)
                })
                .collect();

            let mut next = Vec::new();
            for (region, samples) in sampled {
                #[allow(clippy::cast_possible_truncation)]
                let index = nodes.len() as u32;
                let stats = ChannelStats::from_samples(&samples, channels);

                let node = if stats.is_uniform(channels) {
                    OctreeNode::homogeneous(stats)
                } else {
                    let address = BrickAddress(u64::from(index));
                    store.insert(address, samples);
                    if level == 0 {
                        OctreeNode::leaf(stats, address)
                    } else {
                        next.extend((0..CHILDREN).map(|octant| region.child(index, octant)));
                        OctreeNode::branch(stats, Some(address), [0; CHILDREN])
                    }
                };
                nodes.push(node);

                if let Some((parent, octant)) = region.parent {
                    if let Some(children) = nodes[parent as usize].children.as_mut() {
                        children[octant] = index;
                    }
                }
            }
            frontier = next;
        }

        let octree = Octree::new(nodes, 0, self.config.channels, self.config.brick_dim)?;
        tracing::info!(
            nodes = octree.node_count(),
            bricks = store.len(),
            levels = octree.num_levels(),
            "Generated synthetic volume"
        );
        Ok((octree, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BrickStore;

    fn small_config() -> VolumeConfig {
        VolumeConfig {
            levels: 3,
            brick_dim: 4,
            ..Default::default()
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let (a, _) = VolumeGenerator::new(small_config()).generate().unwrap();
        let (b, _) = VolumeGenerator::new(small_config()).generate().unwrap();
        assert_eq!(a.nodes(), b.nodes());
    }

    #[test]
    fn every_brick_is_stored_with_full_size() {
        let (octree, store) = VolumeGenerator::new(small_config()).generate().unwrap();
        assert_eq!(octree.brick_count(), store.len());
        for node in octree.nodes() {
            if let Some(address) = node.brick {
                let samples = store.retrieve(address).unwrap();
                assert_eq!(samples.len(), octree.brick_samples());
                store.release(address);
            }
        }
        assert_eq!(store.outstanding(), 0);
    }

    #[test]
    fn multichannel_samples_differ_per_channel() {
        let generator = VolumeGenerator::new(VolumeConfig {
            channels: 2,
            threshold: 0,
            ..small_config()
        });
        let differs = (0..16).any(|i| {
            let p = [f64::from(i) * 0.061, 0.3, 0.7];
            generator.sample(p, 0) != generator.sample(p, 1)
        });
        assert!(differs);
    }

    #[test]
    fn zero_threshold_region_stats_are_sane() {
        let generator = VolumeGenerator::new(VolumeConfig {
            threshold: 0,
            ..small_config()
        });
        let (octree, _) = generator.generate().unwrap();
        let root = octree.node(octree.root());
        assert!(root.stats.min[0] <= root.stats.avg[0]);
        assert!(root.stats.avg[0] <= root.stats.max[0]);
        assert_eq!(octree.num_levels(), 3);
    }
}
