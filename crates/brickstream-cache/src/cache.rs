//! The brick cache: node buffer, flag buffer, slot pool and LRU lists of one octree.

use brickstream_core::{Error, Level, NodeId, OctreeId, Result, SlotIndex};
use brickstream_octree::Octree;

use crate::config::CacheConfig;
use crate::flags::{FlagBuffer, FlagState};
use crate::lru::LevelLru;
use crate::node_buffer::NodeBuffer;
use crate::pool::BrickSlotPool;

/// How the next traversal pass treats the flags of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Whole frame is traced again; all flags start cleared.
    FullFrame,
    /// Rays resume where they stopped; traversal bits are kept.
    Refinement,
}

/// Occupancy summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub occupied: usize,
    pub upload_slots: usize,
    /// Resident bricks per level, finest first.
    pub resident_per_level: Vec<usize>,
}

/// Cache state for one octree.
///
/// Built with the octree it serves and rebuilt whenever the dataset or the
/// configuration changes. All mutation happens between dispatches; a
/// [`Dispatch`] borrows the cache for the duration of a traversal pass.
pub struct BrickCache {
    pub(crate) octree_id: OctreeId,
    pub(crate) config: CacheConfig,
    pub(crate) brick_bytes: u64,
    pub(crate) upload_slots: usize,
    pub(crate) nodes: NodeBuffer,
    pub(crate) flags: FlagBuffer,
    pub(crate) pool: BrickSlotPool,
    pub(crate) lru: LevelLru,
}

impl BrickCache {
    /// Allocate buffers for an octree.
    pub fn new(octree: &Octree, config: CacheConfig) -> Result<Self> {
        let brick_bytes = octree.brick_memory_size();
        let slots = config.slot_count(brick_bytes, octree.brick_count())?;
        let upload_slots = config.upload_slots(brick_bytes, slots)?;
        let nodes = NodeBuffer::build(octree)?;

        tracing::info!(
            octree = %octree.id(),
            nodes = nodes.len(),
            slots,
            upload_slots,
            brick_bytes,
            codec = %nodes.codec(),
            "Allocated brick cache"
        );

        Ok(Self {
            octree_id: octree.id(),
            config,
            brick_bytes,
            upload_slots,
            flags: FlagBuffer::new(nodes.len()),
            pool: BrickSlotPool::new(slots, octree.brick_samples()),
            lru: LevelLru::new(octree.num_levels()),
            nodes,
        })
    }

    #[inline]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[inline]
    pub const fn octree_id(&self) -> OctreeId {
        self.octree_id
    }

    #[inline]
    pub const fn node_buffer(&self) -> &NodeBuffer {
        &self.nodes
    }

    #[inline]
    pub const fn flags(&self) -> &FlagBuffer {
        &self.flags
    }

    #[inline]
    pub const fn pool(&self) -> &BrickSlotPool {
        &self.pool
    }

    #[inline]
    pub const fn lru(&self) -> &LevelLru {
        &self.lru
    }

    /// Bytes of one brick.
    #[inline]
    pub const fn brick_bytes(&self) -> u64 {
        self.brick_bytes
    }

    /// Bricks the byte budget admits per frame.
    #[inline]
    pub const fn upload_slots(&self) -> usize {
        self.upload_slots
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.pool.capacity(),
            occupied: self.pool.occupied(),
            upload_slots: self.upload_slots,
            resident_per_level: self.lru.level_lens(),
        }
    }

    pub(crate) fn check_octree(&self, octree: &Octree) -> Result<()> {
        if octree.id() == self.octree_id {
            Ok(())
        } else {
            Err(Error::OctreeMismatch {
                expected: self.octree_id,
                actual: octree.id(),
            })
        }
    }

    /// Evict one resident brick, falling back to the octree averages.
    pub(crate) fn evict(&mut self, octree: &Octree, node: NodeId, level: Level) -> Result<SlotIndex> {
        let slot = self.nodes.slot(node).ok_or_else(|| {
            Error::InvariantViolation(format!("eviction victim {node} is not resident"))
        })?;
        self.nodes.unbind_brick(octree, node);
        self.pool.release(slot);
        self.lru.remove(node, level);
        tracing::trace!(%node, %level, %slot, "Evicted brick");
        Ok(slot)
    }

    /// Cross-check node buffer, pool and LRU lists.
    pub fn check_invariants(&self) -> Result<()> {
        let occupied = self.pool.occupied();
        let tracked = self.lru.len();
        if occupied != tracked {
            return Err(Error::InvariantViolation(format!(
                "{occupied} occupied slots but {tracked} bricks in LRU lists"
            )));
        }
        if occupied > self.pool.capacity() {
            return Err(Error::InvariantViolation(format!(
                "{occupied} resident bricks exceed capacity {}",
                self.pool.capacity()
            )));
        }

        for (slot, node) in self.pool.occupants() {
            if self.nodes.slot(node) != Some(slot) {
                return Err(Error::InvariantViolation(format!(
                    "{slot} owned by {node}, whose descriptor points elsewhere"
                )));
            }
        }

        let bound = self.nodes.records().iter().filter(|r| r.in_pool()).count();
        if bound != occupied {
            return Err(Error::InvariantViolation(format!(
                "{bound} descriptors bound to slots, {occupied} slots occupied"
            )));
        }
        Ok(())
    }

    /// Compare every descriptor with what the octree and pool imply.
    pub fn validate(&self, octree: &Octree) -> Result<()> {
        self.check_octree(octree)?;
        self.check_invariants()?;
        self.nodes.validate(octree, |node| {
            self.nodes.slot(node).filter(|&slot| self.pool.owner(slot) == Some(node))
        })
    }

    /// Prepare flags for a traversal pass and hand out the buffers.
    ///
    /// Clears used and requested bits (and traversed bits unless refining).
    /// The cache cannot be mutated until the returned guard is dropped.
    pub fn begin_dispatch(&mut self, mode: DispatchMode) -> Dispatch<'_> {
        self.flags.clear(mode == DispatchMode::Refinement);
        self.flags.set_state(FlagState::InFlight);
        let written_slots = self.pool.take_written();
        let nodes_dirty = self.nodes.take_dirty();
        Dispatch {
            nodes: &self.nodes,
            pool: &self.pool,
            flags: &mut self.flags,
            written_slots,
            nodes_dirty,
            completed: false,
        }
    }
}

/// Buffers handed to one traversal pass.
///
/// The node buffer and brick pool are read-only; flags are read-write.
/// Flags only become trusted through [`Dispatch::complete`]; dropping the
/// guard without it marks them abandoned.
pub struct Dispatch<'a> {
    nodes: &'a NodeBuffer,
    pool: &'a BrickSlotPool,
    flags: &'a mut FlagBuffer,
    written_slots: Vec<SlotIndex>,
    nodes_dirty: bool,
    completed: bool,
}

impl<'a> Dispatch<'a> {
    pub const fn node_buffer(&self) -> &'a NodeBuffer {
        self.nodes
    }

    pub const fn pool(&self) -> &'a BrickSlotPool {
        self.pool
    }

    /// Node descriptors as raw bytes.
    pub fn node_bytes(&self) -> &'a [u8] {
        self.nodes.as_bytes()
    }

    /// Brick pool samples as one flat buffer.
    pub fn brick_samples(&self) -> &'a [u16] {
        self.pool.data()
    }

    /// Pool slots written since the previous dispatch.
    pub fn written_slots(&self) -> &[SlotIndex] {
        &self.written_slots
    }

    /// Node buffer changed since the previous dispatch.
    pub const fn node_buffer_changed(&self) -> bool {
        self.nodes_dirty
    }

    pub fn flags(&self) -> &FlagBuffer {
        self.flags
    }

    /// Flag bytes for the traversal stage to write.
    pub fn flags_mut(&mut self) -> &mut [u8] {
        self.flags.as_bytes_mut()
    }

    /// Signal that the traversal pass finished.
    pub fn complete(mut self) {
        self.completed = true;
        self.flags.set_state(FlagState::Completed);
    }
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!("Traversal dispatch abandoned, its flags will be ignored");
            self.flags.set_state(FlagState::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolCapacity, UploadBudget};
    use crate::flags::NodeFlags;
    use crate::testing::{complete_tree, pass};
    use brickstream_core::BrickAddress;
    use brickstream_octree::{ChannelStats, OctreeNode};

    fn unlimited(slots: usize) -> CacheConfig {
        CacheConfig {
            pool: PoolCapacity::Slots(slots),
            upload: UploadBudget::UNLIMITED,
        }
    }

    #[test]
    fn rejects_pool_without_room_for_a_brick() {
        let (octree, _) = complete_tree(2, 1, 4);
        let config = CacheConfig {
            pool: PoolCapacity::Bytes(octree.brick_memory_size() - 1),
            ..Default::default()
        };
        assert!(matches!(
            BrickCache::new(&octree, config),
            Err(Error::InsufficientCapacity { .. })
        ));
    }

    #[test]
    fn rejects_foreign_octree() {
        let (octree, store) = complete_tree(2, 1, 2);
        let (other, _) = complete_tree(2, 1, 2);
        let mut cache = BrickCache::new(&octree, unlimited(4)).unwrap();
        assert!(matches!(
            cache.update(&other, &store, None),
            Err(Error::OctreeMismatch { .. })
        ));
    }

    #[test]
    fn fresh_cache_is_consistent() {
        let (octree, _) = complete_tree(3, 3, 2);
        let cache = BrickCache::new(&octree, unlimited(8)).unwrap();
        cache.validate(&octree).unwrap();
        assert_eq!(
            cache.stats(),
            CacheStats {
                capacity: 8,
                occupied: 0,
                upload_slots: 8,
                resident_per_level: vec![0, 0, 0],
            }
        );
    }

    #[test]
    fn dispatch_exposes_changes_since_previous_dispatch() {
        let (octree, store) = complete_tree(2, 1, 2);
        let mut cache = BrickCache::new(&octree, unlimited(4)).unwrap();
        {
            let dispatch = cache.begin_dispatch(DispatchMode::FullFrame);
            assert!(dispatch.node_buffer_changed());
            assert!(dispatch.written_slots().is_empty());
            dispatch.complete();
        }

        pass(&mut cache, &[], &[3]);
        cache.update(&octree, &store, None).unwrap();

        let dispatch = cache.begin_dispatch(DispatchMode::FullFrame);
        assert!(dispatch.node_buffer_changed());
        assert_eq!(dispatch.written_slots(), &[SlotIndex(0)]);
        assert_eq!(dispatch.node_bytes().len(), octree.node_count() * 8);
        assert_eq!(dispatch.brick_samples().len(), 4 * octree.brick_samples());
        assert_eq!(dispatch.pool().owner(SlotIndex(0)), Some(NodeId(3)));
        dispatch.complete();
    }

    #[test]
    fn refinement_dispatch_keeps_traversed_bits() {
        let (octree, _) = complete_tree(2, 1, 2);
        let mut cache = BrickCache::new(&octree, unlimited(4)).unwrap();
        pass(&mut cache, &[], &[2]);

        let dispatch = cache.begin_dispatch(DispatchMode::Refinement);
        assert_eq!(dispatch.flags().get(NodeId(2)), NodeFlags::TRAVERSED);
        assert_eq!(dispatch.flags().state(), FlagState::InFlight);
        dispatch.complete();

        let dispatch = cache.begin_dispatch(DispatchMode::FullFrame);
        assert_eq!(dispatch.flags().get(NodeId(2)), NodeFlags::empty());
        dispatch.complete();
    }

    #[test]
    fn pool_is_capped_at_brick_owning_nodes() {
        let stats = ChannelStats::uniform(&[7]);
        let mut nodes: Vec<OctreeNode> = (0..8u64)
            .map(|i| {
                if i < 3 {
                    OctreeNode::homogeneous(stats)
                } else {
                    OctreeNode::leaf(stats, BrickAddress(i))
                }
            })
            .collect();
        nodes.push(OctreeNode::branch(stats, Some(BrickAddress(8)), [0, 1, 2, 3, 4, 5, 6, 7]));
        let octree = Octree::new(nodes, 8, 1, 2).unwrap();
        assert_eq!(octree.node_count(), 9);

        let cache = BrickCache::new(&octree, unlimited(64)).unwrap();
        assert_eq!(cache.pool().capacity(), 6);
    }

    #[test]
    fn check_invariants_detects_unbound_slot() {
        let (octree, _) = complete_tree(2, 1, 2);
        let mut cache = BrickCache::new(&octree, unlimited(4)).unwrap();
        cache.pool.acquire(NodeId(1));
        assert!(matches!(
            cache.check_invariants(),
            Err(Error::InvariantViolation(_))
        ));
    }
}
