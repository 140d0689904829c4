//! Identifier newtypes shared across the cache.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Position of a node in the breadth-first node buffer layout.
///
/// Id 0 is always the root. As a child pointer, 0 means "no children".
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Pod,
    Zeroable,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The root node.
    pub const ROOT: Self = Self(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a slot in the brick slot pool.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Pod,
    Zeroable,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Opaque, stable address of a brick in its backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BrickAddress(pub u64);

impl fmt::Display for BrickAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "brick@{:#x}", self.0)
    }
}

/// Octree level. Leaves are level 0 and the root sits at `levels - 1`,
/// so a larger level is a coarser region.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Level(pub u8);

impl Level {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true if this level is strictly coarser than `other`.
    #[inline]
    pub const fn is_coarser_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// The next finer level, or `None` at the leaves.
    #[inline]
    pub const fn finer(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(l) => Some(Self(l)),
            None => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Process-unique identity of a loaded octree.
///
/// Two octrees never share an id, even when one is a reload of the other,
/// so caches built for a previous dataset are detected as stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct OctreeId(u64);

static NEXT_OCTREE_ID: AtomicU64 = AtomicU64::new(1);

impl OctreeId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_OCTREE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OctreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "octree-{}", self.0)
    }
}
