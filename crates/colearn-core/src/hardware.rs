//! Hardware command interface.
//!
//! The orchestrator drives the arm and gripper through [`HandoverHardware`].
//! Each call returns once the command has completed; an error is treated as
//! unrecoverable and stops the run.

use crate::config::JointVector;
use colearn_proto::Result;
use std::time::Duration;
use tracing::info;

/// Arm and gripper commands used by the handover phases.
pub trait HandoverHardware {
    /// Moves the arm to the given joint configuration (radians).
    fn send_joint_position_command(&mut self, joints: &JointVector) -> Result<()>;

    /// Opens the gripper to `open_percent` (0 closed, 100 fully open).
    fn send_grasp_command(&mut self, open_percent: u8, duration: Duration) -> Result<()>;

    /// Moves the end effector toward the last observed hand position.
    fn move_toward_last_known_hand(&mut self) -> Result<()>;
}

impl<H: HandoverHardware + ?Sized> HandoverHardware for Box<H> {
    fn send_joint_position_command(&mut self, joints: &JointVector) -> Result<()> {
        (**self).send_joint_position_command(joints)
    }

    fn send_grasp_command(&mut self, open_percent: u8, duration: Duration) -> Result<()> {
        (**self).send_grasp_command(open_percent, duration)
    }

    fn move_toward_last_known_hand(&mut self) -> Result<()> {
        (**self).move_toward_last_known_hand()
    }
}

/// Hardware stand-in that logs every command and always succeeds.
#[derive(Debug, Default)]
pub struct SimulatedHardware {
    commands: u64,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands issued so far.
    pub fn commands(&self) -> u64 {
        self.commands
    }
}

impl HandoverHardware for SimulatedHardware {
    fn send_joint_position_command(&mut self, joints: &JointVector) -> Result<()> {
        self.commands += 1;
        info!(?joints, "Simulated joint position command");
        Ok(())
    }

    fn send_grasp_command(&mut self, open_percent: u8, duration: Duration) -> Result<()> {
        self.commands += 1;
        info!(open_percent, duration_ms = duration.as_millis(), "Simulated grasp command");
        Ok(())
    }

    fn move_toward_last_known_hand(&mut self) -> Result<()> {
        self.commands += 1;
        info!("Simulated reach toward hand");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_hardware_counts_commands() {
        let mut hardware = SimulatedHardware::new();
        hardware.send_joint_position_command(&[0.0; 7]).unwrap();
        hardware
            .send_grasp_command(100, Duration::from_millis(500))
            .unwrap();
        hardware.move_toward_last_known_hand().unwrap();
        assert_eq!(hardware.commands(), 3);
    }

    #[test]
    fn test_boxed_hardware_delegates() {
        let mut hardware: Box<dyn HandoverHardware> = Box::new(SimulatedHardware::new());
        assert!(hardware.move_toward_last_known_hand().is_ok());
    }
}
