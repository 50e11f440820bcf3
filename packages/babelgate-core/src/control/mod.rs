//! Playback/input state machines and barge-in orchestration (`spec.md` §4.9).

pub mod input;
pub mod plane;
pub mod playback;

pub use input::{InputState, InputStatus};
pub use plane::{ControlPlane, ControlPlaneConfig, PipelineActuator};
pub use playback::{PlaybackState, PlaybackStatus};
