//! Hardware double that records every command.

use crate::config::JointVector;
use crate::hardware::HandoverHardware;
use colearn_proto::{Error, Result};
use std::time::Duration;

/// A command received by [`RecordingHardware`].
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCommand {
    JointPosition(JointVector),
    Grasp { open_percent: u8, duration: Duration },
    ReachTowardHand,
}

/// Records commands in order and optionally fails once a command budget is
/// spent.
#[derive(Debug, Default)]
pub struct RecordingHardware {
    commands: Vec<HardwareCommand>,
    fail_after: Option<usize>,
}

impl RecordingHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `count` commands, then fails every following one.
    pub fn failing_after(count: usize) -> Self {
        Self {
            commands: Vec::new(),
            fail_after: Some(count),
        }
    }

    /// Commands accepted so far.
    pub fn commands(&self) -> &[HardwareCommand] {
        &self.commands
    }

    /// Grasp openings in the order they were commanded.
    pub fn grasps(&self) -> Vec<u8> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                HardwareCommand::Grasp { open_percent, .. } => Some(*open_percent),
                _ => None,
            })
            .collect()
    }

    fn accept(&mut self, command: HardwareCommand) -> Result<()> {
        if self.fail_after.is_some_and(|limit| self.commands.len() >= limit) {
            return Err(Error::hardware(format!("{command:?}"), "injected failure"));
        }
        self.commands.push(command);
        Ok(())
    }
}

impl HandoverHardware for RecordingHardware {
    fn send_joint_position_command(&mut self, joints: &JointVector) -> Result<()> {
        self.accept(HardwareCommand::JointPosition(*joints))
    }

    fn send_grasp_command(&mut self, open_percent: u8, duration: Duration) -> Result<()> {
        self.accept(HardwareCommand::Grasp {
            open_percent,
            duration,
        })
    }

    fn move_toward_last_known_hand(&mut self) -> Result<()> {
        self.accept(HardwareCommand::ReachTowardHand)
    }
}
