//! Budgeted brick cache for streamed multiresolution volume octrees.
//!
//! This crate provides:
//! - The 64-bit node descriptor codec
//! - The breadth-first node buffer read by the traversal stage
//! - The per-node flag buffer written back by it
//! - A fixed-capacity brick slot pool with per-level LRU eviction
//! - The per-frame budgeted upload scheduler

pub mod cache;
pub mod codec;
pub mod config;
pub mod flags;
pub mod lru;
pub mod node_buffer;
pub mod pool;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use cache::{BrickCache, CacheStats, Dispatch, DispatchMode};
pub use codec::{NodeCodec, NodeDescriptor, NodePayload, PackedNode};
pub use config::{CacheConfig, PoolCapacity, UploadBudget};
pub use flags::{FlagBuffer, FlagState, FlagStats, NodeFlags};
pub use lru::{LevelLru, LruEntry, Victim};
pub use node_buffer::{NodeBuffer, NodeInfo};
pub use pool::BrickSlotPool;
pub use scheduler::{BrickFailure, UploadReport};
