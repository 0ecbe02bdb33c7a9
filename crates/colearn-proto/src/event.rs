//! Inbound sensor events and the outbound status broadcast.
//!
//! Inbound events arrive on delivery threads and are folded into the
//! [`EventBus`](crate::EventBus) as last-value cells. The only outbound event
//! is [`StatusUpdate`], published whenever the orchestrator changes phase or
//! requests a reset of the secondary task.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed orientation of the human hand.
///
/// `None` means the hand is not in the robot workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    None,
    Serve,
    Drop,
}

impl Orientation {
    /// Returns true when a hand is visible in the workspace.
    pub fn hand_in_workspace(self) -> bool {
        self != Orientation::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::None => "None",
            Orientation::Serve => "Serve",
            Orientation::Drop => "Drop",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest hand pose reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseUpdate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub orientation: Orientation,
}

/// Whether the human is currently signalling intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntentUpdate {
    pub active: bool,
}

/// Handover result as carried on the wire: `-1` failure, `0` pending, `1` success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum HandoverResult {
    Failure,
    #[default]
    Pending,
    Success,
}

impl HandoverResult {
    pub fn is_pending(self) -> bool {
        self == HandoverResult::Pending
    }
}

impl TryFrom<i8> for HandoverResult {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(HandoverResult::Failure),
            0 => Ok(HandoverResult::Pending),
            1 => Ok(HandoverResult::Success),
            other => Err(format!("handover_successful must be -1, 0 or 1, got {other}")),
        }
    }
}

impl From<HandoverResult> for i8 {
    fn from(value: HandoverResult) -> Self {
        match value {
            HandoverResult::Failure => -1,
            HandoverResult::Pending => 0,
            HandoverResult::Success => 1,
        }
    }
}

/// Task status reported by the secondary-task process.
///
/// Carries the handover outcome (with the time left in the secondary task,
/// used for reward shaping) and whether the draining phase has started.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OutcomeUpdate {
    #[serde(default)]
    pub handover_successful: HandoverResult,
    #[serde(default)]
    pub time_left: f64,
    #[serde(default)]
    pub draining_starts: f64,
}

/// An inbound event as it appears in a JSONL feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum InboundEvent {
    #[serde(rename = "hand_pose")]
    Pose(PoseUpdate),

    #[serde(rename = "human_input")]
    Intent(IntentUpdate),

    #[serde(rename = "task_status")]
    Outcome(OutcomeUpdate),
}

impl InboundEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            InboundEvent::Pose(_) => "hand_pose",
            InboundEvent::Intent(_) => "human_input",
            InboundEvent::Outcome(_) => "task_status",
        }
    }
}

/// Outbound status broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub phase: u8,
    pub reset: bool,
    pub draining_starts: f64,
    pub draining_successful: f64,
}

impl StatusUpdate {
    /// A status announcing the given phase.
    pub fn phase(phase: u8) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }

    /// Sets the reset request flag.
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handover_result_wire_values() {
        let status: OutcomeUpdate = serde_json::from_str(
            r#"{"handover_successful":-1,"time_left":2.5,"draining_starts":1.0}"#,
        )
        .unwrap();
        assert_eq!(status.handover_successful, HandoverResult::Failure);
        assert_eq!(status.time_left, 2.5);

        let encoded = serde_json::to_value(HandoverResult::Success).unwrap();
        assert_eq!(encoded, serde_json::json!(1));
    }

    #[test]
    fn test_handover_result_rejects_out_of_range() {
        let result: Result<OutcomeUpdate, _> =
            serde_json::from_str(r#"{"handover_successful":3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_inbound_event_topic_tagging() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"topic":"hand_pose","x":0.1,"y":0.2,"z":0.3,"orientation":"Serve"}"#,
        )
        .unwrap();
        assert_eq!(event.topic(), "hand_pose");
        match event {
            InboundEvent::Pose(pose) => assert_eq!(pose.orientation, Orientation::Serve),
            other => panic!("unexpected event: {other:?}"),
        }

        let intent: InboundEvent =
            serde_json::from_str(r#"{"topic":"human_input","active":true}"#).unwrap();
        assert_eq!(intent, InboundEvent::Intent(IntentUpdate { active: true }));
    }

    #[test]
    fn test_pending_is_default() {
        assert!(OutcomeUpdate::default().handover_successful.is_pending());
        assert!(!Orientation::default().hand_in_workspace());
    }
}
