//! Per-level least-recently-used lists of resident bricks.

use std::collections::VecDeque;

use brickstream_core::{Level, NodeId};

/// A resident brick and the number of passes since it was last used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LruEntry {
    pub node: NodeId,
    pub recency: u32,
}

/// A brick chosen for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub node: NodeId,
    pub level: Level,
    /// Was still in use this pass and is evicted to make room for a request.
    pub forced: bool,
}

/// One recency list per level, most recently used at the front.
#[derive(Debug, Clone, Default)]
pub struct LevelLru {
    lists: Vec<VecDeque<LruEntry>>,
}

impl LevelLru {
    pub fn new(num_levels: u8) -> Self {
        Self {
            lists: vec![VecDeque::new(); usize::from(num_levels)],
        }
    }

    /// Total number of tracked bricks.
    pub fn len(&self) -> usize {
        self.lists.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(VecDeque::is_empty)
    }

    pub fn level_len(&self, level: Level) -> usize {
        self.lists.get(level.index()).map_or(0, VecDeque::len)
    }

    /// Tracked bricks per level, finest first.
    pub fn level_lens(&self) -> Vec<usize> {
        self.lists.iter().map(VecDeque::len).collect()
    }

    /// Entries of one level, most recently used first.
    pub fn entries(&self, level: Level) -> impl Iterator<Item = &LruEntry> + '_ {
        self.lists.get(level.index()).into_iter().flatten()
    }

    /// Move a node to the front of its list with recency 0, inserting it if absent.
    pub fn promote(&mut self, node: NodeId, level: Level) {
        let list = &mut self.lists[level.index()];
        if let Some(pos) = list.iter().position(|e| e.node == node) {
            list.remove(pos);
        }
        list.push_front(LruEntry { node, recency: 0 });
    }

    /// Drop a node. Returns false if it was not tracked.
    pub fn remove(&mut self, node: NodeId, level: Level) -> bool {
        let list = &mut self.lists[level.index()];
        match list.iter().position(|e| e.node == node) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Apply one pass of usage: used bricks move to the front with recency 0,
    /// everything else ages by one. Returns the number of used bricks.
    pub fn record_pass(&mut self, used: impl Fn(NodeId) -> bool) -> usize {
        let mut promoted = 0;
        for list in &mut self.lists {
            let (mut fresh, stale): (VecDeque<_>, VecDeque<_>) =
                list.drain(..).partition(|e| used(e.node));
            promoted += fresh.len();
            for entry in &mut fresh {
                entry.recency = 0;
            }
            fresh.extend(stale.into_iter().map(|e| LruEntry {
                recency: e.recency.saturating_add(1),
                ..e
            }));
            *list = fresh;
        }
        promoted
    }

    /// Choose up to `need` bricks to evict.
    ///
    /// `outstanding` holds the levels of the requests that free slots cannot
    /// serve, in admission order (coarsest first). Bricks unused this pass go
    /// first, finest level first and least recently used first within a level.
    /// If that is not enough, bricks used this pass may be taken when their
    /// level is at least the level of the request they make room for. Bricks
    /// at or above `keep_level` are never taken, used or not.
    pub fn reclaim(&self, need: usize, keep_level: Option<Level>, outstanding: &[Level]) -> Vec<Victim> {
        let _span = tracing::trace_span!("reclaim", need).entered();
        let mut victims = Vec::with_capacity(need);

        for (level, list) in self.evictable_levels(keep_level) {
            for entry in list.iter().rev().filter(|e| e.recency > 0) {
                if victims.len() == need {
                    return victims;
                }
                victims.push(Victim {
                    node: entry.node,
                    level,
                    forced: false,
                });
            }
        }

        let mut candidates: Vec<(Level, NodeId)> = self
            .evictable_levels(keep_level)
            .flat_map(|(level, list)| {
                list.iter()
                    .rev()
                    .filter(|e| e.recency == 0)
                    .map(move |e| (level, e.node))
            })
            .collect();

        while victims.len() < need {
            let Some(&request_level) = outstanding.get(victims.len()) else {
                break;
            };
            let Some(pos) = candidates.iter().position(|(level, _)| *level >= request_level) else {
                break;
            };
            let (level, node) = candidates.remove(pos);
            victims.push(Victim {
                node,
                level,
                forced: true,
            });
        }
        victims
    }

    /// Levels below `keep_level`, finest first.
    #[allow(clippy::cast_possible_truncation)]
    fn evictable_levels(
        &self,
        keep_level: Option<Level>,
    ) -> impl Iterator<Item = (Level, &VecDeque<LruEntry>)> + '_ {
        self.lists
            .iter()
            .enumerate()
            .map(|(i, list)| (Level(i as u8), list))
            .take_while(move |(level, _)| {
                keep_level.map_or(true, |keep| keep.is_coarser_than(*level))
            })
    }
}
