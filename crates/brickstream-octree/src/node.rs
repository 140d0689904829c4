//! Octree node record.

use brickstream_core::constants::{CHILDREN, MAX_CHANNELS};
use brickstream_core::BrickAddress;
use serde::{Deserialize, Serialize};

/// Per-channel summary statistics of a node's region.
///
/// Only the first `num_channels` entries are meaningful; the rest are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub avg: [u16; MAX_CHANNELS],
    pub min: [u16; MAX_CHANNELS],
    pub max: [u16; MAX_CHANNELS],
}

impl ChannelStats {
    /// Statistics of a region filled with one constant value per channel.
    pub fn uniform(values: &[u16]) -> Self {
        let mut avg = [0; MAX_CHANNELS];
        for (dst, src) in avg.iter_mut().zip(values) {
            *dst = *src;
        }
        Self {
            avg,
            min: avg,
            max: avg,
        }
    }

    /// Compute statistics over interleaved samples with `channels` channels.
    pub fn from_samples(samples: &[u16], channels: usize) -> Self {
        let mut min = [u16::MAX; MAX_CHANNELS];
        let mut max = [0u16; MAX_CHANNELS];
        let mut sum = [0u64; MAX_CHANNELS];
        let mut count = 0u64;

        for voxel in samples.chunks_exact(channels) {
            for (c, &v) in voxel.iter().enumerate() {
                min[c] = min[c].min(v);
                max[c] = max[c].max(v);
                sum[c] += u64::from(v);
            }
            count += 1;
        }

        let mut avg = [0u16; MAX_CHANNELS];
        for c in 0..MAX_CHANNELS {
            if c >= channels || count == 0 {
                min[c] = 0;
                max[c] = 0;
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                avg[c] = (sum[c] / count) as u16;
            }
        }
        Self { avg, min, max }
    }

    /// Returns true if every channel has a single value over the region.
    pub fn is_uniform(&self, channels: usize) -> bool {
        (0..channels).all(|c| self.min[c] == self.max[c])
    }
}

/// A node of the volume octree, stored in an arena and linked by index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OctreeNode {
    /// Whole region has one value per channel.
    pub homogeneous: bool,
    /// Summary statistics, independent of any cache residency.
    pub stats: ChannelStats,
    /// Dense sample block for this node, if any.
    pub brick: Option<BrickAddress>,
    /// Arena indices of the 8 children, or `None` for a leaf.
    pub children: Option<[u32; CHILDREN]>,
}

impl OctreeNode {
    /// A leaf that owns a brick.
    pub const fn leaf(stats: ChannelStats, brick: BrickAddress) -> Self {
        Self {
            homogeneous: false,
            stats,
            brick: Some(brick),
            children: None,
        }
    }

    /// A homogeneous leaf. Homogeneous regions never carry a brick.
    pub const fn homogeneous(stats: ChannelStats) -> Self {
        Self {
            homogeneous: true,
            stats,
            brick: None,
            children: None,
        }
    }

    /// An inner node with its own (downsampled) brick.
    pub const fn branch(
        stats: ChannelStats,
        brick: Option<BrickAddress>,
        children: [u32; CHILDREN],
    ) -> Self {
        Self {
            homogeneous: false,
            stats,
            brick,
            children: Some(children),
        }
    }

    #[inline]
    pub const fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    #[inline]
    pub const fn has_brick(&self) -> bool {
        self.brick.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_from_interleaved_samples() {
        let samples = [10, 100, 20, 200, 30, 300];
        let stats = ChannelStats::from_samples(&samples, 2);
        assert_eq!(stats.avg[..2], [20, 200]);
        assert_eq!(stats.min[..2], [10, 100]);
        assert_eq!(stats.max[..2], [30, 300]);
        assert_eq!(stats.avg[2..], [0, 0]);
        assert!(!stats.is_uniform(2));
    }

    #[test]
    fn uniform_stats_are_uniform() {
        let stats = ChannelStats::uniform(&[7, 9, 11]);
        assert!(stats.is_uniform(3));
        assert_eq!(stats.avg, [7, 9, 11, 0]);
    }

    #[test]
    fn homogeneous_nodes_have_no_brick() {
        let node = OctreeNode::homogeneous(ChannelStats::uniform(&[0]));
        assert!(node.is_leaf());
        assert!(!node.has_brick());
    }
}
