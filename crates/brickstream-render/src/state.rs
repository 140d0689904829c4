//! Render/refinement state machine.
//!
//! ```text
//! FirstInteractive -> Interactive  (while interacting)
//! FirstFull -> Full                (while passes admit bricks)
//! Full -> FirstRefinement -> Refinement (while passes admit bricks)
//! Full | Refinement -> Finished    (pass admitted nothing)
//! any -> FirstInteractive | FirstFull on reset
//! ```

use std::time::{Duration, Instant};

use brickstream_cache::DispatchMode;
use serde::{Deserialize, Serialize};

/// Progress state of the image for the current view.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum RenderState {
    /// First frame of an interaction.
    FirstInteractive,
    /// Reduced-fidelity frames while interaction continues.
    Interactive,
    /// First full-quality frame after a reset.
    #[default]
    FirstFull,
    /// Full-quality frames while bricks keep arriving.
    Full,
    /// First pass that keeps per-pixel ray progress.
    FirstRefinement,
    /// Passes resuming unresolved rays.
    Refinement,
    /// Nothing left to load; no further passes.
    Finished,
}

impl RenderState {
    /// Reset target for the given interaction mode.
    pub const fn initial(interacting: bool) -> Self {
        if interacting {
            Self::FirstInteractive
        } else {
            Self::FirstFull
        }
    }

    pub const fn is_interactive(self) -> bool {
        matches!(self, Self::FirstInteractive | Self::Interactive)
    }

    pub const fn is_refining(self) -> bool {
        matches!(self, Self::FirstRefinement | Self::Refinement)
    }
}

/// What the last upload achieved, as far as sequencing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadProgress {
    pub admitted: usize,
    pub stalled: bool,
}

/// Decision for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlan {
    /// State this frame is rendered in.
    pub state: RenderState,
    /// How to prepare the dispatch, or `None` when nothing is rendered.
    pub dispatch: Option<DispatchMode>,
    /// Per-pixel ray progress must start over this frame.
    pub restart_rays: bool,
}

/// Sequencer for interactive, full and refinement passes.
#[derive(Debug, Clone)]
pub struct RenderStateMachine {
    state: RenderState,
    interacting: bool,
    iterative_refinement: bool,
    max_stalled_frames: u32,
    stalled_frames: u32,
    refinement_started: Option<Instant>,
    refinement_took: Option<Duration>,
}

impl RenderStateMachine {
    pub fn new(iterative_refinement: bool, max_stalled_frames: u32) -> Self {
        Self {
            state: RenderState::FirstFull,
            interacting: false,
            iterative_refinement,
            max_stalled_frames,
            stalled_frames: 0,
            refinement_started: None,
            refinement_took: None,
        }
    }

    /// State the next frame starts in.
    #[inline]
    pub const fn state(&self) -> RenderState {
        self.state
    }

    #[inline]
    pub const fn is_interacting(&self) -> bool {
        self.interacting
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == RenderState::Finished
    }

    /// Restart from the first frame of the current interaction mode.
    pub fn reset(&mut self) {
        self.state = RenderState::initial(self.interacting);
        self.stalled_frames = 0;
        self.refinement_started = None;
        self.refinement_took = None;
    }

    /// Enter or leave interaction. Returns true if the machine was reset.
    pub fn set_interaction(&mut self, interacting: bool) -> bool {
        if self.interacting == interacting {
            return false;
        }
        self.interacting = interacting;
        self.reset();
        true
    }

    /// Whether this frame may upload bricks.
    ///
    /// Never on the first interaction frame; during interaction only if the
    /// policy allows; never once finished.
    pub const fn uploads_allowed(&self, upload_during_interaction: bool) -> bool {
        match self.state {
            RenderState::FirstInteractive | RenderState::Finished => false,
            RenderState::Interactive => upload_during_interaction,
            _ => true,
        }
    }

    fn progressing(&mut self, progress: UploadProgress) -> bool {
        if progress.admitted > 0 {
            self.stalled_frames = 0;
            return true;
        }
        if progress.stalled && self.stalled_frames < self.max_stalled_frames {
            self.stalled_frames += 1;
            tracing::debug!(frames = self.stalled_frames, "Uploads stalled, retrying");
            return true;
        }
        false
    }

    /// Decide this frame from the upload outcome and move to the next state.
    pub fn advance(&mut self, progress: UploadProgress) -> FramePlan {
        let current = self.state;
        let frame_state = match current {
            RenderState::Full if !self.progressing(progress) => {
                if self.iterative_refinement {
                    RenderState::FirstRefinement
                } else {
                    RenderState::Finished
                }
            }
            RenderState::Refinement if !self.progressing(progress) => RenderState::Finished,
            state => state,
        };

        match frame_state {
            RenderState::FirstRefinement => {
                self.refinement_started = Some(Instant::now());
                self.refinement_took = None;
            }
            RenderState::Finished if current != RenderState::Finished => {
                match self.refinement_started.take() {
                    Some(start) => {
                        let took = start.elapsed();
                        self.refinement_took = Some(took);
                        tracing::info!(elapsed_ms = took.as_millis(), "Refinement finished");
                    }
                    None => tracing::info!("Frame finished"),
                }
            }
            _ => {}
        }

        self.state = match frame_state {
            RenderState::FirstInteractive => RenderState::Interactive,
            RenderState::FirstFull => RenderState::Full,
            RenderState::FirstRefinement => RenderState::Refinement,
            state => state,
        };

        let dispatch = match frame_state {
            RenderState::Finished => None,
            state if state.is_refining() => Some(DispatchMode::Refinement),
            _ => Some(DispatchMode::FullFrame),
        };
        FramePlan {
            state: frame_state,
            dispatch,
            restart_rays: frame_state == RenderState::FirstRefinement,
        }
    }

    /// Time spent refining so far, or in total once finished.
    pub fn refinement_time(&self) -> Option<Duration> {
        self.refinement_took
            .or_else(|| self.refinement_started.map(|start| start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMITTED: UploadProgress = UploadProgress {
        admitted: 3,
        stalled: false,
    };
    const IDLE: UploadProgress = UploadProgress {
        admitted: 0,
        stalled: false,
    };
    const STALLED: UploadProgress = UploadProgress {
        admitted: 0,
        stalled: true,
    };

    fn states(machine: &mut RenderStateMachine, progress: &[UploadProgress]) -> Vec<RenderState> {
        progress.iter().map(|&p| machine.advance(p).state).collect()
    }

    #[test]
    fn full_then_refinement_then_finished() {
        let mut machine = RenderStateMachine::new(true, 0);
        let seen = states(&mut machine, &[IDLE, ADMITTED, ADMITTED, IDLE, ADMITTED, IDLE, IDLE]);
        assert_eq!(
            seen,
            [
                RenderState::FirstFull,
                RenderState::Full,
                RenderState::Full,
                RenderState::FirstRefinement,
                RenderState::Refinement,
                RenderState::Finished,
                RenderState::Finished,
            ]
        );
        assert!(machine.is_finished());
    }

    #[test]
    fn without_refinement_full_finishes() {
        let mut machine = RenderStateMachine::new(false, 0);
        let seen = states(&mut machine, &[IDLE, IDLE]);
        assert_eq!(seen, [RenderState::FirstFull, RenderState::Finished]);
    }

    #[test]
    fn first_refinement_restarts_rays_and_keeps_traversal() {
        let mut machine = RenderStateMachine::new(true, 0);
        machine.advance(IDLE);
        let plan = machine.advance(IDLE);
        assert_eq!(plan.state, RenderState::FirstRefinement);
        assert!(plan.restart_rays);
        assert_eq!(plan.dispatch, Some(DispatchMode::Refinement));
        assert!(machine.refinement_time().is_some());

        let plan = machine.advance(ADMITTED);
        assert_eq!(plan.state, RenderState::Refinement);
        assert!(!plan.restart_rays);

        let plan = machine.advance(IDLE);
        assert_eq!(plan.dispatch, None);
        let took = machine.refinement_time().unwrap();
        assert_eq!(machine.refinement_time(), Some(took));

        machine.reset();
        assert_eq!(machine.refinement_time(), None);
    }

    #[test]
    fn interaction_toggles_reset() {
        let mut machine = RenderStateMachine::new(true, 0);
        machine.advance(IDLE);
        machine.advance(ADMITTED);

        assert!(machine.set_interaction(true));
        assert!(!machine.set_interaction(true));
        assert_eq!(machine.state(), RenderState::FirstInteractive);
        assert!(!machine.uploads_allowed(true));

        let seen = states(&mut machine, &[IDLE, IDLE, IDLE]);
        assert_eq!(
            seen,
            [
                RenderState::FirstInteractive,
                RenderState::Interactive,
                RenderState::Interactive,
            ]
        );
        assert!(machine.uploads_allowed(true));
        assert!(!machine.uploads_allowed(false));

        assert!(machine.set_interaction(false));
        assert_eq!(machine.state(), RenderState::FirstFull);
    }

    #[test]
    fn stalls_are_retried_a_bounded_number_of_times() {
        let mut machine = RenderStateMachine::new(false, 2);
        let seen = states(&mut machine, &[IDLE, STALLED, STALLED, STALLED]);
        assert_eq!(
            seen,
            [
                RenderState::FirstFull,
                RenderState::Full,
                RenderState::Full,
                RenderState::Finished,
            ]
        );
    }

    #[test]
    fn admissions_reset_the_stall_counter() {
        let mut machine = RenderStateMachine::new(false, 1);
        let seen = states(&mut machine, &[IDLE, STALLED, ADMITTED, STALLED, IDLE]);
        assert_eq!(seen[3], RenderState::Full);
        assert_eq!(seen[4], RenderState::Finished);
    }

    #[test]
    fn finished_allows_no_uploads() {
        let mut machine = RenderStateMachine::new(false, 0);
        machine.advance(IDLE);
        machine.advance(IDLE);
        assert!(!machine.uploads_allowed(true));
        machine.reset();
        assert_eq!(machine.state(), RenderState::FirstFull);
        assert!(machine.uploads_allowed(false));
    }
}
