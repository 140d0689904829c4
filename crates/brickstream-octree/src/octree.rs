//! Arena octree: the read-only dataset a brick cache wraps.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use brickstream_core::constants::{MAX_CHANNELS, SAMPLE_BYTES};
use brickstream_core::{Error, OctreeId, Result};
use serde::{Deserialize, Serialize};

use crate::node::OctreeNode;

/// Multiresolution volume octree.
///
/// Nodes live in one contiguous arena and reference their children by
/// arena index. The arena order is arbitrary; the breadth-first layout the
/// cache uses is derived separately.
#[derive(Debug, Serialize, Deserialize)]
pub struct Octree {
    #[serde(skip, default = "OctreeId::next")]
    id: OctreeId,
    nodes: Vec<OctreeNode>,
    root: u32,
    num_channels: u8,
    brick_dim: u32,
    #[serde(skip)]
    num_levels: u8,
}

impl Octree {
    /// Assemble an octree from an arena of nodes.
    ///
    /// Every node must be reachable from `root` exactly once.
    pub fn new(nodes: Vec<OctreeNode>, root: u32, num_channels: u8, brick_dim: u32) -> Result<Self> {
        let mut octree = Self {
            id: OctreeId::next(),
            nodes,
            root,
            num_channels,
            brick_dim,
            num_levels: 0,
        };
        octree.num_levels = octree.validate()?;
        Ok(octree)
    }

    /// Check structure and return the number of levels.
    fn validate(&self) -> Result<u8> {
        if self.num_channels == 0 || usize::from(self.num_channels) > MAX_CHANNELS {
            return Err(Error::InvalidChannelCount(self.num_channels));
        }
        if self.brick_dim == 0 {
            return Err(Error::InvalidOctree("brick dimension is zero".into()));
        }
        if self.root as usize >= self.nodes.len() {
            return Err(Error::InvalidOctree(format!(
                "root index {} outside arena of {} nodes",
                self.root,
                self.nodes.len()
            )));
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![(self.root, 0usize)];
        let mut max_depth = 0;
        while let Some((index, depth)) = stack.pop() {
            let slot = &mut seen[index as usize];
            if *slot {
                return Err(Error::InvalidOctree(format!(
                    "node {index} is referenced more than once"
                )));
            }
            *slot = true;
            max_depth = max_depth.max(depth);

            let node = &self.nodes[index as usize];
            if node.homogeneous && node.brick.is_some() {
                return Err(Error::InvalidOctree(format!(
                    "homogeneous node {index} carries a brick"
                )));
            }
            if let Some(children) = node.children {
                for child in children {
                    if child as usize >= self.nodes.len() {
                        return Err(Error::InvalidOctree(format!(
                            "node {index} references missing child {child}"
                        )));
                    }
                    stack.push((child, depth + 1));
                }
            }
        }

        if let Some(orphan) = seen.iter().position(|s| !s) {
            return Err(Error::InvalidOctree(format!(
                "node {orphan} is not reachable from the root"
            )));
        }

        u8::try_from(max_depth + 1)
            .map_err(|_| Error::InvalidOctree(format!("tree depth {} too large", max_depth + 1)))
    }

    /// Process-unique identity of this octree instance.
    #[inline]
    pub const fn id(&self) -> OctreeId {
        self.id
    }

    /// Arena index of the root node.
    #[inline]
    pub const fn root(&self) -> u32 {
        self.root
    }

    /// Node at an arena index.
    #[inline]
    pub fn node(&self, index: u32) -> &OctreeNode {
        &self.nodes[index as usize]
    }

    /// All nodes in arena order.
    pub fn nodes(&self) -> &[OctreeNode] {
        &self.nodes
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes that own a brick.
    pub fn brick_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.has_brick()).count()
    }

    #[inline]
    pub const fn num_channels(&self) -> u8 {
        self.num_channels
    }

    /// Number of levels. The root sits at level `num_levels - 1`.
    #[inline]
    pub const fn num_levels(&self) -> u8 {
        self.num_levels
    }

    /// Edge length of a brick in samples.
    #[inline]
    pub const fn brick_dim(&self) -> u32 {
        self.brick_dim
    }

    /// Number of `u16` values in one brick (all channels interleaved).
    pub fn brick_samples(&self) -> usize {
        let dim = self.brick_dim as usize;
        dim * dim * dim * usize::from(self.num_channels)
    }

    /// Size of one brick in bytes.
    pub fn brick_memory_size(&self) -> u64 {
        (self.brick_samples() * SAMPLE_BYTES) as u64
    }

    /// Write the octree to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Read an octree written by [`Octree::save`].
    ///
    /// The loaded tree gets a fresh identity.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut octree: Self = bincode::deserialize_from(reader)?;
        octree.num_levels = octree.validate()?;
        tracing::info!(
            nodes = octree.node_count(),
            levels = octree.num_levels,
            channels = octree.num_channels,
            "Loaded octree"
        );
        Ok(octree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ChannelStats;
    use brickstream_core::BrickAddress;

    fn two_level_tree() -> Octree {
        let stats = ChannelStats::uniform(&[100]);
        let mut nodes: Vec<OctreeNode> = (0..8)
            .map(|i| OctreeNode::leaf(stats, BrickAddress(i + 1)))
            .collect();
        nodes.push(OctreeNode::branch(
            stats,
            Some(BrickAddress(0)),
            [0, 1, 2, 3, 4, 5, 6, 7],
        ));
        Octree::new(nodes, 8, 1, 4).unwrap()
    }

    #[test]
    fn levels_and_sizes() {
        let tree = two_level_tree();
        assert_eq!(tree.num_levels(), 2);
        assert_eq!(tree.node_count(), 9);
        assert_eq!(tree.brick_count(), 9);
        assert_eq!(tree.brick_samples(), 64);
        assert_eq!(tree.brick_memory_size(), 128);
    }

    #[test]
    fn rejects_shared_children() {
        let stats = ChannelStats::uniform(&[1]);
        let nodes = vec![
            OctreeNode::leaf(stats, BrickAddress(1)),
            OctreeNode::branch(stats, None, [0; 8]),
        ];
        assert!(matches!(
            Octree::new(nodes, 1, 1, 4),
            Err(Error::InvalidOctree(_))
        ));
    }

    #[test]
    fn rejects_bad_channel_count() {
        let nodes = vec![OctreeNode::homogeneous(ChannelStats::default())];
        assert!(matches!(
            Octree::new(nodes, 0, 5, 4),
            Err(Error::InvalidChannelCount(5))
        ));
    }

    #[test]
    fn rejects_orphans() {
        let stats = ChannelStats::uniform(&[1]);
        let nodes = vec![
            OctreeNode::homogeneous(stats),
            OctreeNode::homogeneous(stats),
        ];
        assert!(Octree::new(nodes, 0, 1, 4).is_err());
    }

    #[test]
    fn save_and_load_gets_new_identity() {
        let tree = two_level_tree();
        let path = std::env::temp_dir().join(format!("brickstream-octree-{}.bin", tree.id().get()));
        tree.save(&path).unwrap();
        let loaded = Octree::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_ne!(loaded.id(), tree.id());
        assert_eq!(loaded.nodes(), tree.nodes());
        assert_eq!(loaded.num_levels(), 2);
    }
}
