//! Fixed-capacity brick slot pool.

use std::collections::BTreeSet;

use brickstream_core::{NodeId, SlotIndex};

/// `capacity` fixed-size slots in one flat sample buffer.
///
/// Each occupied slot records its owning node, and a node owns at most one
/// slot. Free slots are handed out lowest index first.
#[derive(Debug, Clone)]
pub struct BrickSlotPool {
    slot_samples: usize,
    data: Vec<u16>,
    owners: Vec<Option<NodeId>>,
    free: BTreeSet<u32>,
    written: Vec<SlotIndex>,
}

impl BrickSlotPool {
    /// Create a pool of `capacity` slots holding `slot_samples` values each.
    pub fn new(capacity: usize, slot_samples: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let free = (0..capacity as u32).collect();
        Self {
            slot_samples,
            data: vec![0; capacity * slot_samples],
            owners: vec![None; capacity],
            free,
            written: Vec::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.owners.len()
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn occupied(&self) -> usize {
        self.capacity() - self.free.len()
    }

    /// Samples per slot.
    #[inline]
    pub const fn slot_samples(&self) -> usize {
        self.slot_samples
    }

    #[inline]
    pub fn owner(&self, slot: SlotIndex) -> Option<NodeId> {
        self.owners[slot.index()]
    }

    /// Occupied slots with their owners.
    pub fn occupants(&self) -> impl Iterator<Item = (SlotIndex, NodeId)> + '_ {
        self.owners.iter().enumerate().filter_map(|(i, owner)| {
            #[allow(clippy::cast_possible_truncation)]
            let slot = SlotIndex(i as u32);
            owner.map(|node| (slot, node))
        })
    }

    /// Whole pool as one flat buffer.
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    pub fn slot_data(&self, slot: SlotIndex) -> &[u16] {
        let offset = slot.index() * self.slot_samples;
        &self.data[offset..offset + self.slot_samples]
    }

    /// Claim the lowest free slot for `node`.
    pub(crate) fn acquire(&mut self, node: NodeId) -> Option<SlotIndex> {
        let index = self.free.pop_first()?;
        self.owners[index as usize] = Some(node);
        Some(SlotIndex(index))
    }

    /// Copy a brick into an acquired slot.
    pub(crate) fn write(&mut self, slot: SlotIndex, samples: &[u16]) {
        debug_assert_eq!(samples.len(), self.slot_samples);
        debug_assert!(self.owners[slot.index()].is_some());
        let offset = slot.index() * self.slot_samples;
        self.data[offset..offset + self.slot_samples].copy_from_slice(samples);
        self.written.push(slot);
    }

    /// Return a slot to the free set, yielding its previous owner.
    pub(crate) fn release(&mut self, slot: SlotIndex) -> Option<NodeId> {
        let owner = self.owners[slot.index()].take();
        if owner.is_some() {
            self.free.insert(slot.0);
        }
        owner
    }

    /// Slots written since the last call, for incremental device upload.
    pub fn take_written(&mut self) -> Vec<SlotIndex> {
        std::mem::take(&mut self.written)
    }
}
