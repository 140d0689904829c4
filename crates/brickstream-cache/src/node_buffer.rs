//! Breadth-first node descriptor buffer.

use brickstream_core::constants::CHILDREN;
use brickstream_core::{Error, Level, NodeId, Result, SlotIndex};
use brickstream_octree::Octree;

use crate::codec::{NodeCodec, NodeDescriptor, NodePayload, PackedNode, MAX_CHILD_POINTER};

/// Where a buffer entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Arena index of the node in its octree.
    pub octree_index: u32,
    pub level: Level,
    pub parent: Option<NodeId>,
}

/// Flat array of packed descriptors in breadth-first order.
///
/// The root is entry 0 and each inner node's 8 children occupy one
/// contiguous block starting at its child pointer. Blocks are handed out
/// from offset 1 upwards, so 0 never is a valid child pointer.
#[derive(Debug, Clone)]
pub struct NodeBuffer {
    codec: NodeCodec,
    records: Vec<PackedNode>,
    infos: Vec<NodeInfo>,
    num_levels: u8,
    dirty: bool,
}

impl NodeBuffer {
    /// Lay out an octree. Every node starts non-resident with its averages.
    pub fn build(octree: &Octree) -> Result<Self> {
        let codec = NodeCodec::new(octree.num_channels())?;
        let max_nodes = MAX_CHILD_POINTER as usize + CHILDREN;
        if octree.node_count() > max_nodes {
            return Err(Error::TooManyNodes {
                nodes: octree.node_count(),
                max: max_nodes,
            });
        }

        let root_level = Level(octree.num_levels().saturating_sub(1));
        let mut infos = Vec::with_capacity(octree.node_count());
        let mut records = Vec::with_capacity(octree.node_count());
        infos.push(NodeInfo {
            octree_index: octree.root(),
            level: root_level,
            parent: None,
        });

        let mut cursor = 0;
        while cursor < infos.len() {
            let info = infos[cursor];
            let node = octree.node(info.octree_index);

            let child_pointer = match (node.children, info.level.finer()) {
                (Some(children), Some(child_level)) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let base = infos.len() as u32;
                    #[allow(clippy::cast_possible_truncation)]
                    let parent = Some(NodeId(cursor as u32));
                    infos.extend(children.iter().map(|&octree_index| NodeInfo {
                        octree_index,
                        level: child_level,
                        parent,
                    }));
                    base
                }
                (Some(_), None) => {
                    return Err(Error::InvalidOctree(format!(
                        "node {} has children below the finest level",
                        info.octree_index
                    )))
                }
                (None, _) => 0,
            };

            records.push(codec.encode(&NodeDescriptor {
                homogeneous: node.homogeneous,
                child_pointer,
                payload: NodePayload::Average(node.stats.avg),
            }));
            cursor += 1;
        }

        tracing::debug!(nodes = records.len(), levels = octree.num_levels(), "Built node buffer");
        Ok(Self {
            codec,
            records,
            infos,
            num_levels: octree.num_levels(),
            dirty: true,
        })
    }

    #[inline]
    pub const fn codec(&self) -> &NodeCodec {
        &self.codec
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub const fn num_levels(&self) -> u8 {
        self.num_levels
    }

    #[inline]
    pub fn info(&self, node: NodeId) -> &NodeInfo {
        &self.infos[node.index()]
    }

    #[inline]
    pub fn level(&self, node: NodeId) -> Level {
        self.infos[node.index()].level
    }

    #[inline]
    pub fn get(&self, node: NodeId) -> PackedNode {
        self.records[node.index()]
    }

    pub fn descriptor(&self, node: NodeId) -> NodeDescriptor {
        self.codec.decode(self.records[node.index()])
    }

    #[inline]
    pub fn slot(&self, node: NodeId) -> Option<SlotIndex> {
        self.records[node.index()].slot()
    }

    #[inline]
    pub fn is_resident(&self, node: NodeId) -> bool {
        self.records[node.index()].in_pool()
    }

    /// Children block of a node, if it has one.
    pub fn children(&self, node: NodeId) -> Option<std::ops::Range<u32>> {
        match self.records[node.index()].child_pointer() {
            0 => None,
            #[allow(clippy::cast_possible_truncation)]
            base => Some(base..base + CHILDREN as u32),
        }
    }

    pub fn records(&self) -> &[PackedNode] {
        &self.records
    }

    /// Raw bytes as the traversal stage reads them.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    /// Returns true once after the buffer changed.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn bind_brick(&mut self, node: NodeId, slot: SlotIndex) {
        let record = &mut self.records[node.index()];
        *record = self.codec.update_brick_binding(*record, &NodePayload::Brick(slot));
        self.dirty = true;
    }

    /// Switch back to the octree-owned averages.
    pub(crate) fn unbind_brick(&mut self, octree: &Octree, node: NodeId) {
        let averages = octree.node(self.infos[node.index()].octree_index).stats.avg;
        let record = &mut self.records[node.index()];
        *record = self
            .codec
            .update_brick_binding(*record, &NodePayload::Average(averages));
        self.dirty = true;
    }

    /// Re-derive every descriptor and compare with the stored one.
    ///
    /// `resident` reports the slot a node should be bound to.
    pub fn validate(
        &self,
        octree: &Octree,
        resident: impl Fn(NodeId) -> Option<SlotIndex>,
    ) -> Result<()> {
        if self.records.len() != octree.node_count() {
            return Err(Error::InvariantViolation(format!(
                "node buffer holds {} entries, octree has {} nodes",
                self.records.len(),
                octree.node_count()
            )));
        }

        for (i, (&record, info)) in self.records.iter().zip(&self.infos).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let id = NodeId(i as u32);
            let node = octree.node(info.octree_index);
            let decoded = self.codec.decode(record);

            if decoded.homogeneous != node.homogeneous {
                return Err(Error::InvariantViolation(format!(
                    "{id}: homogeneous flag differs from octree"
                )));
            }
            if (decoded.child_pointer == 0) != node.is_leaf() {
                return Err(Error::InvariantViolation(format!(
                    "{id}: child pointer {} disagrees with octree leaf state",
                    decoded.child_pointer
                )));
            }
            if let Some(range) = self.children(id) {
                let expected = node.children.unwrap_or_default();
                for (child, octree_child) in range.zip(expected) {
                    let child_info = &self.infos[child as usize];
                    if child_info.octree_index != octree_child || child_info.parent != Some(id) {
                        return Err(Error::InvariantViolation(format!(
                            "{id}: child block does not match octree children"
                        )));
                    }
                }
            }

            let expected = match resident(id) {
                Some(slot) => NodePayload::Brick(slot),
                None => self.codec.decode(self.codec.encode(&NodeDescriptor {
                    homogeneous: node.homogeneous,
                    child_pointer: 0,
                    payload: NodePayload::Average(node.stats.avg),
                }))
                .payload,
            };
            if decoded.payload != expected {
                return Err(Error::InvariantViolation(format!(
                    "{id}: payload {:?}, expected {expected:?}",
                    decoded.payload
                )));
            }
        }
        Ok(())
    }
}
