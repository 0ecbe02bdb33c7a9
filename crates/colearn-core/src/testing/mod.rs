//! Testing utilities for deterministic orchestrator tests.

mod recording_hardware;
mod scripted_task;

pub use recording_hardware::{HardwareCommand, RecordingHardware};
pub use scripted_task::ScriptedTask;
