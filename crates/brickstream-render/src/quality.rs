//! Rendering quality presets.

use serde::{Deserialize, Serialize};

/// Parameters a quality preset controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySettings {
    /// Samples per voxel along a ray.
    pub sampling_rate: f32,
    /// Levels subtracted from the camera-derived node depth.
    pub node_level_reduction: u8,
    /// Divisor applied to the viewport for the internal render size.
    pub screen_reduction: u32,
    /// Whether the preset allows iterative refinement.
    pub iterative_refinement: bool,
}

/// Quality while the view is at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RenderingQuality {
    Full,
    #[default]
    High,
    Medium,
    Low,
}

impl RenderingQuality {
    pub const fn settings(self) -> QualitySettings {
        match self {
            Self::Full => QualitySettings {
                sampling_rate: 1.0,
                node_level_reduction: 0,
                screen_reduction: 1,
                iterative_refinement: true,
            },
            Self::High => QualitySettings {
                sampling_rate: 1.0,
                node_level_reduction: 1,
                screen_reduction: 1,
                iterative_refinement: true,
            },
            Self::Medium => QualitySettings {
                sampling_rate: 0.75,
                node_level_reduction: 1,
                screen_reduction: 2,
                iterative_refinement: false,
            },
            Self::Low => QualitySettings {
                sampling_rate: 0.5,
                node_level_reduction: 2,
                screen_reduction: 3,
                iterative_refinement: false,
            },
        }
    }
}

/// Quality while the user interacts with the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum InteractionQuality {
    High,
    #[default]
    Medium,
    Low,
}

impl InteractionQuality {
    pub const fn settings(self) -> QualitySettings {
        match self {
            Self::High => QualitySettings {
                sampling_rate: 1.0,
                node_level_reduction: 1,
                screen_reduction: 1,
                iterative_refinement: false,
            },
            Self::Medium => QualitySettings {
                sampling_rate: 0.75,
                node_level_reduction: 1,
                screen_reduction: 2,
                iterative_refinement: false,
            },
            Self::Low => QualitySettings {
                sampling_rate: 0.5,
                node_level_reduction: 2,
                screen_reduction: 3,
                iterative_refinement: false,
            },
        }
    }

    /// Interaction never looks better than the resting quality.
    #[must_use]
    pub const fn limited_to(self, rendering: RenderingQuality) -> Self {
        match (self, rendering) {
            (Self::High, RenderingQuality::Medium) => Self::Medium,
            (Self::High | Self::Medium, RenderingQuality::Low) => Self::Low,
            (quality, _) => quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_degrade_monotonically() {
        let presets = [
            RenderingQuality::Full,
            RenderingQuality::High,
            RenderingQuality::Medium,
            RenderingQuality::Low,
        ];
        for pair in presets.windows(2) {
            let (better, worse) = (pair[0].settings(), pair[1].settings());
            assert!(worse.sampling_rate <= better.sampling_rate);
            assert!(worse.node_level_reduction >= better.node_level_reduction);
            assert!(worse.screen_reduction >= better.screen_reduction);
        }
        assert!(RenderingQuality::Full.settings().iterative_refinement);
        assert!(!RenderingQuality::Low.settings().iterative_refinement);
    }

    #[test]
    fn interaction_is_limited_by_rendering_quality() {
        assert_eq!(
            InteractionQuality::High.limited_to(RenderingQuality::Full),
            InteractionQuality::High
        );
        assert_eq!(
            InteractionQuality::High.limited_to(RenderingQuality::Medium),
            InteractionQuality::Medium
        );
        assert_eq!(
            InteractionQuality::Medium.limited_to(RenderingQuality::Low),
            InteractionQuality::Low
        );
        assert_eq!(
            InteractionQuality::Low.limited_to(RenderingQuality::High),
            InteractionQuality::Low
        );
    }
}
