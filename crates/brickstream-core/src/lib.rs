//! Core types and errors for brickstream.
//!
//! This crate provides the foundational types shared by the octree, cache
//! and render crates:
//! - Identifier newtypes for nodes, slots, bricks and levels
//! - The workspace error type
//! - Sample format constants

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BrickAddress, Level, NodeId, OctreeId, SlotIndex};

/// Sample format constants
pub mod constants {
    /// Maximum number of channels per sample
    pub const MAX_CHANNELS: usize = 4;
    /// Bits per channel of a full-precision sample
    pub const SAMPLE_BITS: u32 = 16;
    /// Bytes per channel of a full-precision sample
    pub const SAMPLE_BYTES: usize = 2;
    /// Children per inner node
    pub const CHILDREN: usize = 8;
}
