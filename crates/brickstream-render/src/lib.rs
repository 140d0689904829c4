//! Frame sequencing for brick-cached volume rendering.
//!
//! Decides per frame whether to render interactively, at full quality or
//! by resuming rays, uploads what the last pass requested and runs the
//! CPU reference traversal.

pub mod camera;
pub mod config;
pub mod controller;
pub mod quality;
pub mod ray_buffer;
pub mod state;
pub mod traversal;

pub use camera::Camera;
pub use config::{keep_level, RenderConfig};
pub use controller::{FrameController, FrameInput, FrameOutcome, ResetCause};
pub use quality::{InteractionQuality, QualitySettings, RenderingQuality};
pub use ray_buffer::{RayBuffer, RayProgress};
pub use state::{FramePlan, RenderState, RenderStateMachine, UploadProgress};
pub use traversal::{trace_pass, Ray, TraceSettings, TraceStats};
