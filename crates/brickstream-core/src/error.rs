//! Error types shared by the brickstream crates.

use thiserror::Error;

use crate::types::{BrickAddress, OctreeId};

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Channel count outside `1..=MAX_CHANNELS`
    #[error("Invalid channel count: {0} (expected 1..=4)")]
    InvalidChannelCount(u8),

    /// Slot pool cannot hold a single brick
    #[error("Brick pool of {capacity_bytes} bytes cannot hold a brick of {brick_bytes} bytes")]
    InsufficientCapacity { capacity_bytes: u64, brick_bytes: u64 },

    /// Upload budget cannot admit a single brick
    #[error("Upload budget of {budget_bytes} bytes is smaller than a brick of {brick_bytes} bytes")]
    InsufficientBudget { budget_bytes: u64, brick_bytes: u64 },

    /// Node count does not fit into the child pointer field
    #[error("Octree has {nodes} nodes, descriptor child pointers address at most {max}")]
    TooManyNodes { nodes: usize, max: usize },

    /// Slot count does not fit into the brick slot field
    #[error("Brick pool has {slots} slots, descriptors address at most {max}")]
    TooManySlots { slots: usize, max: usize },

    /// Backing store has no data for the address
    #[error("Brick not found: {0}")]
    BrickNotFound(BrickAddress),

    /// Backing store returned a brick of the wrong size
    #[error("Brick {address} has {actual} samples, expected {expected}")]
    BrickSizeMismatch {
        address: BrickAddress,
        expected: usize,
        actual: usize,
    },

    /// Cache was built for a different octree
    #[error("Cache built for octree {expected} used with octree {actual}")]
    OctreeMismatch { expected: OctreeId, actual: OctreeId },

    /// Structurally invalid octree
    #[error("Invalid octree: {0}")]
    InvalidOctree(String),

    /// Internal bookkeeping disagrees with itself
    #[error("Cache invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
