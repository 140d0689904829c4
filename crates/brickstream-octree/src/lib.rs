//! Volume octree data model for brickstream.
//!
//! The octree is the read-only dataset a brick cache wraps: nodes with
//! summary statistics, optional bricks and child links, plus the storage
//! backend bricks are retrieved from.

pub mod generation;
pub mod node;
pub mod octree;
pub mod store;

pub use generation::{VolumeConfig, VolumeGenerator};
pub use node::{ChannelStats, OctreeNode};
pub use octree::Octree;
pub use store::{BrickStore, RamBrickStore};
