//! Test harness for brickstream.
//!
//! Provides storage fault injection and a headless frame loop that drives
//! cache, state machine and traversal together.

pub mod faults;
pub mod harness;

pub use faults::{CorruptStore, FailingStore, SlowStore};
pub use harness::{layered_volume, FrameSummary, Harness};

use brickstream_cache::{CacheConfig, PoolCapacity, UploadBudget};
use brickstream_render::RenderConfig;
use glam::UVec2;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Cache error: {0}")]
    Cache(#[from] brickstream_core::Error),
    #[error("Rendering did not finish within {frames} frames")]
    NotConverged { frames: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Octree levels, root included.
    pub levels: u8,
    pub channels: u8,
    pub brick_dim: u32,
    pub viewport: UVec2,
    pub cache: CacheConfig,
    pub render: RenderConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            channels: 1,
            brick_dim: 4,
            viewport: UVec2::new(48, 32),
            cache: CacheConfig {
                pool: PoolCapacity::Slots(128),
                upload: UploadBudget::UNLIMITED,
            },
            render: RenderConfig::default(),
        }
    }
}
