//! Fixtures shared by the unit tests.

use brickstream_core::{BrickAddress, NodeId};
use brickstream_octree::{ChannelStats, Octree, OctreeNode, RamBrickStore};

use crate::cache::{BrickCache, DispatchMode};
use crate::flags::NodeFlags;

/// Complete octree with `levels` levels; every node owns a brick filled
/// with its arena index.
pub fn complete_tree(levels: u8, channels: u8, brick_dim: u32) -> (Octree, RamBrickStore) {
    fn build(
        nodes: &mut Vec<OctreeNode>,
        store: &mut RamBrickStore,
        level: u8,
        channels: u8,
        samples: usize,
    ) -> u32 {
        let children = (level > 0).then(|| {
            let mut children = [0; 8];
            for child in &mut children {
                *child = build(nodes, store, level - 1, channels, samples);
            }
            children
        });

        let index = nodes.len() as u32;
        let address = BrickAddress(u64::from(index));
        store.insert(address, vec![index as u16; samples]);
        let stats = ChannelStats::uniform(&vec![(index as u16).wrapping_mul(97); usize::from(channels)]);
        nodes.push(match children {
            Some(children) => OctreeNode::branch(stats, Some(address), children),
            None => OctreeNode::leaf(stats, address),
        });
        index
    }

    let dim = brick_dim as usize;
    let samples = dim * dim * dim * usize::from(channels);
    let mut nodes = Vec::new();
    let mut store = RamBrickStore::new();
    let root = build(&mut nodes, &mut store, levels - 1, channels, samples);
    let octree = Octree::new(nodes, root, channels, brick_dim).unwrap();
    (octree, store)
}

/// Run one traversal pass that marks the given nodes.
pub fn pass(cache: &mut BrickCache, used: &[u32], requested: &[u32]) {
    let mut dispatch = cache.begin_dispatch(DispatchMode::FullFrame);
    let flags = dispatch.flags_mut();
    for &id in used {
        flags[id as usize] |= (NodeFlags::USED | NodeFlags::TRAVERSED).bits();
    }
    for &id in requested {
        flags[id as usize] |= (NodeFlags::REQUESTED | NodeFlags::TRAVERSED).bits();
    }
    dispatch.complete();
}

pub fn resident(cache: &BrickCache, ids: impl IntoIterator<Item = u32>) -> Vec<u32> {
    ids.into_iter()
        .filter(|&id| cache.node_buffer().is_resident(NodeId(id)))
        .collect()
}
