//! Phase, action and state model of the handover protocol.
//!
//! The protocol has four phases. Each phase admits a fixed set of actions,
//! and a valid action moves the system to one of 17 discrete states chosen
//! by a fixed lookup on the observed hand orientation and human intent.

use colearn_proto::Orientation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of protocol phases.
pub const PHASE_COUNT: usize = 4;
/// Size of the action space.
pub const ACTION_COUNT: usize = 8;
/// Size of the state space.
pub const STATE_COUNT: usize = 17;

/// Stage of the handover protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Robot at home, deciding when to hand over.
    #[default]
    Home,
    /// Choosing the target pose.
    TargetSelection,
    /// Approaching and reaching toward the hand.
    Approach,
    /// Releasing the object.
    Release,
}

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::Home,
        Phase::TargetSelection,
        Phase::Approach,
        Phase::Release,
    ];

    pub fn index(self) -> usize {
        match self {
            Phase::Home => 0,
            Phase::TargetSelection => 1,
            Phase::Approach => 2,
            Phase::Release => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The phase after this one, or `None` for the terminal phase.
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Release
    }

    /// Actions that are legal while this phase is active.
    pub fn legal_actions(self) -> &'static [Action] {
        match self {
            Phase::Home => &[Action::InitiateHandover, Action::WaitForIntent],
            Phase::TargetSelection => &[Action::ServePose, Action::DropPose],
            Phase::Approach => &[Action::OpenFully, Action::OpenPartially, Action::Hold],
            Phase::Release => &[Action::ReturnHome],
        }
    }

    pub fn is_legal(self, action: Action) -> bool {
        self.legal_actions().contains(&action)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Home => "home",
            Phase::TargetSelection => "target_selection",
            Phase::Approach => "approach",
            Phase::Release => "release",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.index(), self.as_str())
    }
}

/// A robot action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    ReturnHome,
    /// Start the handover as soon as the human asks.
    InitiateHandover,
    /// Wait for the human to change hand orientation.
    WaitForIntent,
    ServePose,
    DropPose,
    OpenFully,
    OpenPartially,
    /// Keep the hand closed for a moment.
    Hold,
}

impl Action {
    pub const ALL: [Action; ACTION_COUNT] = [
        Action::ReturnHome,
        Action::InitiateHandover,
        Action::WaitForIntent,
        Action::ServePose,
        Action::DropPose,
        Action::OpenFully,
        Action::OpenPartially,
        Action::Hold,
    ];

    pub fn index(self) -> usize {
        match self {
            Action::ReturnHome => 0,
            Action::InitiateHandover => 1,
            Action::WaitForIntent => 2,
            Action::ServePose => 3,
            Action::DropPose => 4,
            Action::OpenFully => 5,
            Action::OpenPartially => 6,
            Action::Hold => 7,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::ReturnHome => "return_home",
            Action::InitiateHandover => "initiate_handover",
            Action::WaitForIntent => "wait_for_intent",
            Action::ServePose => "serve_pose",
            Action::DropPose => "drop_pose",
            Action::OpenFully => "open_fully",
            Action::OpenPartially => "open_partially",
            Action::Hold => "hold",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.index(), self.as_str())
    }
}

/// Discrete state ordinal in `0..STATE_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct State(u8);

impl State {
    pub const HOME: State = State(0);

    pub fn new(index: usize) -> Option<Self> {
        (index < STATE_COUNT).then(|| State(index as u8))
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Iterates over every state ordinal.
    pub fn all() -> impl Iterator<Item = State> {
        (0..STATE_COUNT as u8).map(State)
    }

    /// Phase in which a decision is taken from this state.
    pub fn phase(self) -> Phase {
        match self.0 {
            0 => Phase::Home,
            1..=4 => Phase::TargetSelection,
            5..=10 => Phase::Approach,
            _ => Phase::Release,
        }
    }
}

impl TryFrom<usize> for State {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        State::new(value).ok_or_else(|| format!("state {value} out of range 0..{STATE_COUNT}"))
    }
}

impl From<State> for usize {
    fn from(state: State) -> Self {
        state.index()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensor context a transition is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Context {
    pub orientation: Orientation,
    pub human_intent: bool,
}

/// Computes the state reached by taking `action` in `phase`.
///
/// Returns `None` when the action is not legal in the phase.
///
/// | phase | action | context | state |
/// |---|---|---|---|
/// | 0 | 1 | hand absent / present | 2 / 1 |
/// | 0 | 2 | hand absent / present | 4 / 2 |
/// | 1 | 3 | Serve / Drop / None | 5 / 7 / 9 |
/// | 1 | 4 | Serve / Drop / None | 6 / 8 / 10 |
/// | 2 | 5, 6, 7 | intent | 11, 12, 13 |
/// | 2 | 5, 6, 7 | no intent | 14, 15, 16 |
/// | 3 | 0 | any | 0 |
pub fn transition(phase: Phase, action: Action, context: Context) -> Option<State> {
    if !phase.is_legal(action) {
        return None;
    }
    let present = context.orientation.hand_in_workspace();
    let index = match (phase, action) {
        (Phase::Home, Action::InitiateHandover) => {
            if present {
                1
            } else {
                2
            }
        }
        (Phase::Home, Action::WaitForIntent) => {
            if present {
                2
            } else {
                4
            }
        }
        (Phase::TargetSelection, Action::ServePose) => match context.orientation {
            Orientation::Serve => 5,
            Orientation::Drop => 7,
            Orientation::None => 9,
        },
        (Phase::TargetSelection, Action::DropPose) => match context.orientation {
            Orientation::Serve => 6,
            Orientation::Drop => 8,
            Orientation::None => 10,
        },
        (Phase::Approach, Action::OpenFully) => {
            if context.human_intent {
                11
            } else {
                14
            }
        }
        (Phase::Approach, Action::OpenPartially) => {
            if context.human_intent {
                12
            } else {
                15
            }
        }
        (Phase::Approach, Action::Hold) => {
            if context.human_intent {
                13
            } else {
                16
            }
        }
        (Phase::Release, Action::ReturnHome) => 0,
        _ => return None,
    };
    State::new(index)
}
