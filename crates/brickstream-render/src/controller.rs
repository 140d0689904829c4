//! Per-frame driver tying the cache, the state machine and traversal together.

use std::time::Duration;

use brickstream_cache::{BrickCache, UploadReport};
use brickstream_core::{Level, Result};
use brickstream_octree::{BrickStore, Octree};
use glam::UVec2;

use crate::camera::Camera;
use crate::config::{keep_level, RenderConfig};
use crate::quality::QualitySettings;
use crate::ray_buffer::RayBuffer;
use crate::state::{FramePlan, RenderState, RenderStateMachine, UploadProgress};
use crate::traversal::{trace_pass, TraceSettings, TraceStats};

/// Opacity of a full-scale sample over one voxel.
const DEFAULT_DENSITY: f32 = 0.05;

/// Why the image was started over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    CameraMoved,
    TransferFunctionChanged,
    DatasetChanged,
    InteractionChanged,
    ViewportChanged,
    ConfigChanged,
}

/// What the application reports each frame.
#[derive(Debug, Clone)]
pub struct FrameInput {
    pub interacting: bool,
    pub viewport: UVec2,
    pub camera: Camera,
}

/// What happened in one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    pub frame: u64,
    pub plan: FramePlan,
    /// Upload results, if uploads were allowed this frame.
    pub report: Option<UploadReport>,
    pub keep_level: Option<Level>,
    pub settings: QualitySettings,
    /// Depth below the root that traversal requested bricks at.
    pub node_depth: u8,
    pub render_size: UVec2,
    /// Traversal results, if a pass was dispatched.
    pub trace: Option<TraceStats>,
}

impl FrameOutcome {
    pub fn admitted(&self) -> usize {
        self.report.as_ref().map_or(0, |r| r.admitted)
    }
}

/// Drives one view of one octree frame by frame.
pub struct FrameController {
    config: RenderConfig,
    machine: RenderStateMachine,
    rays: RayBuffer,
    camera: Option<Camera>,
    viewport: UVec2,
    density: f32,
    frame: u64,
    last_reset: Option<ResetCause>,
}

impl FrameController {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            machine: RenderStateMachine::new(config.refines(), config.max_stalled_frames),
            config,
            rays: RayBuffer::new(UVec2::ZERO),
            camera: None,
            viewport: UVec2::ZERO,
            density: DEFAULT_DENSITY,
            frame: 0,
            last_reset: None,
        }
    }

    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub const fn state(&self) -> RenderState {
        self.machine.state()
    }

    pub fn is_finished(&self) -> bool {
        self.machine.is_finished()
    }

    pub const fn rays(&self) -> &RayBuffer {
        &self.rays
    }

    /// Frames started so far.
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    pub const fn last_reset(&self) -> Option<ResetCause> {
        self.last_reset
    }

    /// Wall time since iterative refinement started, if it has.
    pub fn refinement_time(&self) -> Option<Duration> {
        self.machine.refinement_time()
    }

    /// Start the image over and discard ray progress.
    pub fn reset(&mut self, cause: ResetCause) {
        tracing::debug!(?cause, from = ?self.machine.state(), "Render reset");
        self.machine.reset();
        self.rays.reset();
        self.last_reset = Some(cause);
    }

    pub fn on_transfer_function_changed(&mut self) {
        self.reset(ResetCause::TransferFunctionChanged);
    }

    /// The caller rebuilt its cache for another octree.
    pub fn on_dataset_changed(&mut self) {
        self.camera = None;
        self.reset(ResetCause::DatasetChanged);
    }

    pub fn set_config(&mut self, config: RenderConfig) {
        if config == self.config {
            return;
        }
        let interacting = self.machine.is_interacting();
        self.machine = RenderStateMachine::new(config.refines(), config.max_stalled_frames);
        self.machine.set_interaction(interacting);
        self.config = config;
        self.reset(ResetCause::ConfigChanged);
    }

    /// Opacity a full-scale sample contributes per voxel.
    pub fn set_density(&mut self, density: f32) {
        if (density - self.density).abs() > f32::EPSILON {
            self.density = density;
            self.on_transfer_function_changed();
        }
    }

    fn apply_input(&mut self, input: &FrameInput) {
        if self.machine.set_interaction(input.interacting) {
            self.rays.reset();
            self.last_reset = Some(ResetCause::InteractionChanged);
        }
        if input.viewport != self.viewport {
            self.viewport = input.viewport;
            // Ray progress is per pixel; full frames start over anyway.
            if self.machine.state() >= RenderState::FirstRefinement {
                self.reset(ResetCause::ViewportChanged);
            }
        }
        if self.camera.as_ref() != Some(&input.camera) {
            if self.camera.is_some() {
                self.reset(ResetCause::CameraMoved);
            }
            self.camera = Some(input.camera.clone());
        }
    }

    /// Run one frame: upload what the previous pass asked for, decide the
    /// state and dispatch the next traversal pass.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn begin_frame(
        &mut self,
        cache: &mut BrickCache,
        octree: &Octree,
        store: &dyn BrickStore,
        input: &FrameInput,
    ) -> Result<FrameOutcome> {
        self.apply_input(input);
        self.frame += 1;

        let interacting = self.machine.is_interacting();
        let settings = self.config.settings(interacting);
        let render_size = (input.viewport / settings.screen_reduction.max(1)).max(UVec2::ONE);
        let node_depth = input
            .camera
            .node_depth(octree.brick_dim(), octree.num_levels(), render_size.y)
            .saturating_sub(settings.node_level_reduction);

        let keep_level = (interacting && self.config.keep_interaction_bricks)
            .then(|| {
                let stats = cache.stats();
                keep_level(
                    octree.num_levels(),
                    node_depth,
                    &stats.resident_per_level,
                    stats.capacity,
                )
            })
            .flatten();

        let report = if self.machine.uploads_allowed(self.config.upload_during_interaction) {
            Some(cache.update(octree, store, keep_level)?)
        } else {
            None
        };
        let progress = report.as_ref().map_or_else(UploadProgress::default, |r| UploadProgress {
            admitted: r.admitted,
            stalled: r.stalled,
        });

        let plan = self.machine.advance(progress);
        if plan.restart_rays {
            self.rays.reset();
        }

        let trace = plan.dispatch.map(|mode| {
            let mut dispatch = cache.begin_dispatch(mode);
            let stats = trace_pass(
                &mut dispatch,
                &input.camera,
                &mut self.rays,
                TraceSettings {
                    render_size,
                    target_depth: node_depth,
                    brick_dim: octree.brick_dim(),
                    sampling_rate: settings.sampling_rate,
                    density: self.density,
                    resume: plan.state.is_refining(),
                },
            );
            dispatch.complete();
            stats
        });

        tracing::debug!(
            frame = self.frame,
            state = ?plan.state,
            admitted = progress.admitted,
            node_depth,
            "Frame"
        );
        Ok(FrameOutcome {
            frame: self.frame,
            plan,
            report,
            keep_level,
            settings,
            node_depth,
            render_size,
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickstream_cache::{CacheConfig, PoolCapacity, UploadBudget};
    use crate::quality::RenderingQuality;
    use brickstream_octree::{RamBrickStore, VolumeConfig, VolumeGenerator};
    use glam::Vec3;

    fn setup(slots: usize) -> (Octree, RamBrickStore, BrickCache) {
        let (octree, store) = VolumeGenerator::new(VolumeConfig {
            seed: 3,
            levels: 3,
            brick_dim: 4,
            threshold: 0,
            ..VolumeConfig::default()
        })
        .generate()
        .unwrap();
        let cache = BrickCache::new(
            &octree,
            CacheConfig {
                pool: PoolCapacity::Slots(slots),
                upload: UploadBudget::UNLIMITED,
            },
        )
        .unwrap();
        (octree, store, cache)
    }

    fn input(interacting: bool) -> FrameInput {
        FrameInput {
            interacting,
            viewport: UVec2::new(32, 24),
            camera: Camera::new(Vec3::new(0.5, 0.5, 1.6), Vec3::splat(0.5), 1.0),
        }
    }

    #[test]
    fn converges_to_finished() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());

        let mut seen = Vec::new();
        for _ in 0..40 {
            let outcome = controller
                .begin_frame(&mut cache, &octree, &store, &input(false))
                .unwrap();
            seen.push(outcome.plan.state);
            if controller.is_finished() {
                break;
            }
        }

        assert!(controller.is_finished());
        assert_eq!(seen[0], RenderState::FirstFull);
        assert!(seen.contains(&RenderState::FirstRefinement));
        assert_eq!(controller.rays().unresolved(), 0);
        cache.validate(&octree).unwrap();
        assert_eq!(store.outstanding(), 0);
    }

    /// Run frames until the image is refining or done.
    fn refine(
        controller: &mut FrameController,
        cache: &mut BrickCache,
        octree: &Octree,
        store: &RamBrickStore,
    ) {
        for _ in 0..40 {
            controller.begin_frame(cache, octree, store, &input(false)).unwrap();
            if controller.state() >= RenderState::Refinement {
                return;
            }
        }
        panic!("never reached refinement");
    }

    #[test]
    fn transfer_function_edit_restarts_the_image() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());
        refine(&mut controller, &mut cache, &octree, &store);
        let resets = controller.rays().resets();

        controller.on_transfer_function_changed();
        assert_eq!(controller.state(), RenderState::FirstFull);
        assert_eq!(controller.last_reset(), Some(ResetCause::TransferFunctionChanged));
        assert!(controller.rays().resets() > resets);
        assert_eq!(controller.refinement_time(), None);

        let outcome = controller
            .begin_frame(&mut cache, &octree, &store, &input(false))
            .unwrap();
        assert_eq!(outcome.plan.state, RenderState::FirstFull);
    }

    #[test]
    fn density_change_counts_as_transfer_function_edit() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());
        refine(&mut controller, &mut cache, &octree, &store);

        let resets = controller.rays().resets();
        let state = controller.state();
        controller.set_density(DEFAULT_DENSITY);
        assert_eq!(controller.rays().resets(), resets);
        assert_eq!(controller.state(), state);

        controller.set_density(0.2);
        assert_eq!(controller.state(), RenderState::FirstFull);
        assert_eq!(controller.last_reset(), Some(ResetCause::TransferFunctionChanged));
        assert!(controller.rays().resets() > resets);
    }

    #[test]
    fn dataset_change_restarts_without_a_camera_reset() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());
        refine(&mut controller, &mut cache, &octree, &store);
        let resets = controller.rays().resets();

        controller.on_dataset_changed();
        assert_eq!(controller.state(), RenderState::FirstFull);
        assert_eq!(controller.last_reset(), Some(ResetCause::DatasetChanged));
        assert!(controller.rays().resets() > resets);

        let (octree, store, mut cache) = setup(128);
        let outcome = controller
            .begin_frame(&mut cache, &octree, &store, &input(false))
            .unwrap();
        assert_eq!(outcome.plan.state, RenderState::FirstFull);
        assert_eq!(controller.last_reset(), Some(ResetCause::DatasetChanged));
    }

    #[test]
    fn config_change_restarts_and_keeps_interaction() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());
        refine(&mut controller, &mut cache, &octree, &store);

        let resets = controller.rays().resets();
        controller.set_config(RenderConfig::default());
        assert_eq!(controller.rays().resets(), resets);
        assert!(controller.state() >= RenderState::Refinement);

        controller.set_config(RenderConfig {
            quality: RenderingQuality::Medium,
            ..RenderConfig::default()
        });
        assert_eq!(controller.state(), RenderState::FirstFull);
        assert_eq!(controller.last_reset(), Some(ResetCause::ConfigChanged));
        assert!(controller.rays().resets() > resets);

        controller
            .begin_frame(&mut cache, &octree, &store, &input(true))
            .unwrap();
        controller.set_config(RenderConfig::default());
        assert_eq!(controller.state(), RenderState::FirstInteractive);
        assert_eq!(controller.last_reset(), Some(ResetCause::ConfigChanged));
    }

    #[test]
    fn camera_motion_restarts_the_image() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());
        for _ in 0..4 {
            controller
                .begin_frame(&mut cache, &octree, &store, &input(false))
                .unwrap();
        }

        let mut moved = input(false);
        moved.camera.position = Vec3::new(1.5, 0.5, 1.5);
        let outcome = controller
            .begin_frame(&mut cache, &octree, &store, &moved)
            .unwrap();
        assert_eq!(outcome.plan.state, RenderState::FirstFull);
        assert_eq!(controller.last_reset(), Some(ResetCause::CameraMoved));
    }

    #[test]
    fn first_interactive_frame_uploads_nothing() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());
        controller
            .begin_frame(&mut cache, &octree, &store, &input(false))
            .unwrap();

        let outcome = controller
            .begin_frame(&mut cache, &octree, &store, &input(true))
            .unwrap();
        assert_eq!(outcome.plan.state, RenderState::FirstInteractive);
        assert!(outcome.report.is_none());
        assert!(outcome.keep_level.is_some());
        assert_eq!(outcome.render_size, UVec2::new(16, 12));

        let outcome = controller
            .begin_frame(&mut cache, &octree, &store, &input(true))
            .unwrap();
        assert_eq!(outcome.plan.state, RenderState::Interactive);
        assert!(outcome.report.is_some());
    }

    #[test]
    fn interaction_without_uploads_never_touches_the_pool() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig {
            upload_during_interaction: false,
            ..RenderConfig::default()
        });
        for _ in 0..5 {
            let outcome = controller
                .begin_frame(&mut cache, &octree, &store, &input(true))
                .unwrap();
            assert!(outcome.report.is_none());
        }
        assert_eq!(cache.pool().occupied(), 0);
    }

    #[test]
    fn viewport_change_discards_ray_progress() {
        let (octree, store, mut cache) = setup(128);
        let mut controller = FrameController::new(RenderConfig::default());
        let mut frame = input(false);
        for _ in 0..3 {
            controller.begin_frame(&mut cache, &octree, &store, &frame).unwrap();
        }
        let resets = controller.rays().resets();

        frame.viewport = UVec2::new(40, 30);
        let outcome = controller.begin_frame(&mut cache, &octree, &store, &frame).unwrap();
        assert_eq!(outcome.plan.state, RenderState::FirstFull);
        assert!(controller.rays().resets() > resets);
        assert_eq!(controller.rays().dims(), UVec2::new(40, 30));
    }
}
