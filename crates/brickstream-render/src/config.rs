//! Frame sequencing options.

use brickstream_core::Level;
use serde::{Deserialize, Serialize};

use crate::quality::{InteractionQuality, QualitySettings, RenderingQuality};

/// How frames are sequenced and which bricks may move while interacting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Upload bricks on interactive frames after the first.
    pub upload_during_interaction: bool,
    /// Protect coarse bricks from eviction while interacting.
    pub keep_interaction_bricks: bool,
    /// Resume rays across passes once full frames stop loading bricks.
    pub iterative_refinement: bool,
    pub quality: RenderingQuality,
    pub interaction_quality: InteractionQuality,
    /// Frames to keep trying after an update admitted nothing for lack of room.
    pub max_stalled_frames: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            upload_during_interaction: true,
            keep_interaction_bricks: true,
            iterative_refinement: true,
            quality: RenderingQuality::default(),
            interaction_quality: InteractionQuality::default(),
            max_stalled_frames: 3,
        }
    }
}

impl RenderConfig {
    /// Settings for the current interaction mode.
    pub const fn settings(&self, interacting: bool) -> QualitySettings {
        if interacting {
            self.interaction_quality.limited_to(self.quality).settings()
        } else {
            self.quality.settings()
        }
    }

    /// Refinement needs both the option and a preset that supports it.
    pub const fn refines(&self) -> bool {
        self.iterative_refinement && self.quality.settings().iterative_refinement
    }
}

/// Coarsest level whose bricks must stay put while interacting.
///
/// Starts at the level the camera asks for and moves coarser while the
/// bricks at that level and above fill more than half the pool. Returns
/// `None` once no level qualifies.
pub fn keep_level(
    num_levels: u8,
    node_depth: u8,
    resident_per_level: &[usize],
    capacity: usize,
) -> Option<Level> {
    let mut keep = usize::from(num_levels.saturating_sub(1).saturating_sub(node_depth));
    let levels = usize::from(num_levels);
    while keep < levels && resident_per_level.iter().skip(keep).sum::<usize>() > capacity / 2 {
        keep += 1;
    }
    #[allow(clippy::cast_possible_truncation)]
    let keep = Level(keep as u8);
    (keep.index() < levels).then_some(keep)
}
