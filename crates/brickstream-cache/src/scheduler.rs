//! Incremental upload scheduler.
//!
//! Once per frame, after the traversal pass completed, [`BrickCache::update`]
//! turns the pass's flags into residency changes:
//!
//! 1. used bricks are promoted in their LRU list, unused ones age
//! 2. requested, non-resident bricks are collected coarsest level first
//! 3. free slots are counted and an eviction plan covers the rest
//! 4. requests are admitted in order until a budget runs out
//!
//! A victim is only evicted once the brick replacing it has been retrieved,
//! and a descriptor is only bound after the brick was copied, so stopping
//! at any point leaves every descriptor consistent.

use std::time::{Duration, Instant};

use brickstream_core::{BrickAddress, Error, Level, NodeId, Result, SlotIndex};
use brickstream_octree::{BrickStore, Octree};

use crate::cache::BrickCache;
use crate::flags::{FlagState, FlagStats, NodeFlags};
use crate::lru::Victim;

/// A brick that could not be admitted because its data was unavailable.
#[derive(Debug)]
pub struct BrickFailure {
    pub node: NodeId,
    pub address: BrickAddress,
    pub error: Error,
}

/// Outcome of one update.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Flag counts of the pass that was read back.
    pub flags: FlagStats,
    /// Resident bricks marked used.
    pub used: usize,
    /// Requested bricks that were not resident.
    pub requested: usize,
    /// Bricks made resident.
    pub admitted: usize,
    /// Bricks evicted to make room.
    pub evicted: usize,
    /// Evictions of bricks that were still in use.
    pub forced_evictions: usize,
    /// Requests left for a later frame.
    pub deferred: usize,
    /// Requests whose brick could not be retrieved. Each one still uses up
    /// a place in this frame's admissible batch, so a failure can leave a
    /// free slot unused until the next frame.
    pub failures: Vec<BrickFailure>,
    /// Bytes copied into the pool.
    pub bytes: u64,
    pub elapsed: Duration,
    /// Nothing was admitted although requests and room existed.
    pub stalled: bool,
}

impl UploadReport {
    /// True if the update had no trusted flags to work from.
    pub const fn is_idle(&self) -> bool {
        self.requested == 0 && self.used == 0 && self.flags.traversed == 0
    }
}

/// Time and byte limits of one update.
struct BudgetClock {
    start: Instant,
    time_limit: Option<Duration>,
    max_bytes: Option<u64>,
    bytes: u64,
}

impl BudgetClock {
    fn admits(&self, brick_bytes: u64) -> bool {
        if self
            .time_limit
            .is_some_and(|limit| self.start.elapsed() >= limit)
        {
            return false;
        }
        self.max_bytes
            .map_or(true, |max| self.bytes + brick_bytes <= max)
    }
}

impl BrickCache {
    /// Read back the completed pass and upload what it requested.
    ///
    /// `keep_level` protects resident bricks at that level and coarser from
    /// being displaced, used or not. Flags are consumed: a second call
    /// without a new completed dispatch does nothing.
    pub fn update(
        &mut self,
        octree: &Octree,
        store: &dyn BrickStore,
        keep_level: Option<Level>,
    ) -> Result<UploadReport> {
        self.check_octree(octree)?;
        let _span = tracing::debug_span!("brick_update").entered();

        let mut report = UploadReport::default();
        if !self.flags.is_trusted() {
            tracing::trace!(state = ?self.flags.state(), "Flags not trusted, skipping update");
            return Ok(report);
        }
        self.flags.set_state(FlagState::Consumed);

        let mut clock = BudgetClock {
            start: Instant::now(),
            time_limit: self.config.upload.time_limit,
            max_bytes: self.config.upload.max_bytes,
            bytes: 0,
        };

        report.flags = self.flags.analyze();
        let flags = &self.flags;
        report.used = self
            .lru
            .record_pass(|node| flags.get(node).contains(NodeFlags::USED));

        let requests = self.collect_requests(octree);
        report.requested = requests.len();
        if requests.is_empty() {
            report.elapsed = clock.start.elapsed();
            return Ok(report);
        }

        let free = self.pool.free_count();
        let wanted = requests.len().min(self.upload_slots);
        let outstanding: Vec<Level> = requests[free.min(wanted)..wanted]
            .iter()
            .map(|&(_, level)| level)
            .collect();
        let plan = self.lru.reclaim(outstanding.len(), keep_level, &outstanding);
        let admissible = wanted.min(free + plan.len());
        let mut victims = plan.into_iter();

        {
            let _span = tracing::trace_span!("upload", admissible).entered();
            for &(node, level) in &requests[..admissible] {
                if !clock.admits(self.brick_bytes) {
                    break;
                }
                match self.admit(octree, store, node, level, &mut victims, &mut report)? {
                    Admission::Done => {
                        report.admitted += 1;
                        clock.bytes += self.brick_bytes;
                    }
                    Admission::Failed => {}
                    Admission::NoRoom => break,
                }
            }
        }

        report.bytes = clock.bytes;
        report.deferred = requests.len() - report.admitted - report.failures.len();
        report.stalled = report.admitted == 0 && admissible > 0;
        report.elapsed = clock.start.elapsed();
        debug_assert!(self.check_invariants().is_ok());

        if report.stalled {
            tracing::warn!(
                requested = report.requested,
                failures = report.failures.len(),
                "Brick uploads stalled"
            );
        }
        tracing::debug!(
            used = report.used,
            requested = report.requested,
            admitted = report.admitted,
            evicted = report.evicted,
            deferred = report.deferred,
            occupied = self.pool.occupied(),
            elapsed_us = report.elapsed.as_micros(),
            "Brick update"
        );
        Ok(report)
    }

    /// Requested, non-resident nodes with a brick, coarsest level first.
    fn collect_requests(&self, octree: &Octree) -> Vec<(NodeId, Level)> {
        let mut brickless = 0usize;
        let mut requests: Vec<(NodeId, Level)> = self
            .flags
            .iter()
            .filter(|(node, flags)| {
                flags.contains(NodeFlags::REQUESTED) && !self.nodes.is_resident(*node)
            })
            .filter(|(node, _)| {
                let has_brick = octree
                    .node(self.nodes.info(*node).octree_index)
                    .has_brick();
                brickless += usize::from(!has_brick);
                has_brick
            })
            .map(|(node, _)| (node, self.nodes.level(node)))
            .collect();

        if brickless > 0 {
            tracing::warn!(count = brickless, "Bricks requested for nodes without a brick");
        }
        requests.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        requests
    }

    fn admit(
        &mut self,
        octree: &Octree,
        store: &dyn BrickStore,
        node: NodeId,
        level: Level,
        victims: &mut impl Iterator<Item = Victim>,
        report: &mut UploadReport,
    ) -> Result<Admission> {
        let Some(address) = octree.node(self.nodes.info(node).octree_index).brick else {
            return Ok(Admission::Failed);
        };

        let samples = match store.retrieve(address) {
            Ok(samples) => samples,
            Err(error) => {
                tracing::warn!(%node, %address, %error, "Failed to retrieve brick");
                report.failures.push(BrickFailure {
                    node,
                    address,
                    error,
                });
                return Ok(Admission::Failed);
            }
        };
        if samples.len() != self.pool.slot_samples() {
            store.release(address);
            let error = Error::BrickSizeMismatch {
                address,
                expected: self.pool.slot_samples(),
                actual: samples.len(),
            };
            tracing::warn!(%node, %error, "Rejected brick");
            report.failures.push(BrickFailure {
                node,
                address,
                error,
            });
            return Ok(Admission::Failed);
        }

        let slot = match self.acquire_slot(octree, node, victims, report) {
            Ok(Some(slot)) => slot,
            Ok(None) => {
                store.release(address);
                return Ok(Admission::NoRoom);
            }
            Err(error) => {
                store.release(address);
                return Err(error);
            }
        };

        self.pool.write(slot, &samples);
        store.release(address);
        self.nodes.bind_brick(node, slot);
        self.lru.promote(node, level);
        Ok(Admission::Done)
    }

    fn acquire_slot(
        &mut self,
        octree: &Octree,
        node: NodeId,
        victims: &mut impl Iterator<Item = Victim>,
        report: &mut UploadReport,
    ) -> Result<Option<SlotIndex>> {
        if let Some(slot) = self.pool.acquire(node) {
            return Ok(Some(slot));
        }
        let Some(victim) = victims.next() else {
            return Ok(None);
        };
        self.evict(octree, victim.node, victim.level)?;
        report.evicted += 1;
        report.forced_evictions += usize::from(victim.forced);
        self.pool.acquire(node).map(Some).ok_or_else(|| {
            Error::InvariantViolation(format!("no free slot after evicting {}", victim.node))
        })
    }
}

enum Admission {
    Done,
    Failed,
    NoRoom,
}
