//! Cache configuration.

use std::time::Duration;

use brickstream_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::codec::MAX_SLOTS;

const MIB: u64 = 1024 * 1024;

/// Size of the brick slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolCapacity {
    /// Pool memory in bytes; the slot count is derived from the brick size.
    Bytes(u64),
    /// Exact number of slots.
    Slots(usize),
}

impl Default for PoolCapacity {
    fn default() -> Self {
        Self::Bytes(512 * MIB)
    }
}

/// Per-frame upload budget.
///
/// `None` lifts a limit. A zero time limit admits nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadBudget {
    pub max_bytes: Option<u64>,
    pub time_limit: Option<Duration>,
}

impl UploadBudget {
    /// Default byte budget per frame.
    pub const DEFAULT_BYTES: u64 = 32 * MIB;

    /// Default time ceiling per frame.
    pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_millis(250);

    /// No limits.
    pub const UNLIMITED: Self = Self {
        max_bytes: None,
        time_limit: None,
    };

    /// Admits nothing, useful to freeze residency.
    pub const FROZEN: Self = Self {
        max_bytes: None,
        time_limit: Some(Duration::ZERO),
    };

    /// Byte budget only.
    pub const fn bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            time_limit: None,
        }
    }
}

impl Default for UploadBudget {
    fn default() -> Self {
        Self {
            max_bytes: Some(Self::DEFAULT_BYTES),
            time_limit: Some(Self::DEFAULT_TIME_LIMIT),
        }
    }
}

/// Configuration of a brick cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub pool: PoolCapacity,
    pub upload: UploadBudget,
}

impl CacheConfig {
    /// Slot count for bricks of `brick_bytes`, capped at the number of
    /// nodes that own a brick.
    pub fn slot_count(&self, brick_bytes: u64, brick_count: usize) -> Result<usize> {
        let slots = match self.pool {
            PoolCapacity::Bytes(bytes) => usize::try_from(bytes / brick_bytes.max(1)).unwrap_or(usize::MAX),
            PoolCapacity::Slots(slots) => slots,
        };
        if slots == 0 {
            let capacity_bytes = match self.pool {
                PoolCapacity::Bytes(bytes) => bytes,
                PoolCapacity::Slots(_) => 0,
            };
            return Err(Error::InsufficientCapacity {
                capacity_bytes,
                brick_bytes,
            });
        }

        let slots = slots.min(brick_count.max(1));
        if slots > MAX_SLOTS {
            return Err(Error::TooManySlots {
                slots,
                max: MAX_SLOTS,
            });
        }
        Ok(slots)
    }

    /// Bricks the byte budget admits per frame, at most `slots`.
    pub fn upload_slots(&self, brick_bytes: u64, slots: usize) -> Result<usize> {
        let Some(budget_bytes) = self.upload.max_bytes else {
            return Ok(slots);
        };
        let bricks = budget_bytes / brick_bytes.max(1);
        if bricks == 0 {
            return Err(Error::InsufficientBudget {
                budget_bytes,
                brick_bytes,
            });
        }
        Ok(usize::try_from(bricks).map_or(slots, |b| b.min(slots)))
    }
}
