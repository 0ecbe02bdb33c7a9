//! Phase environment.
//!
//! Owns the phase/state machine of one handover episode. Actions are checked
//! against the legal set of the active phase; invalid actions are a no-op
//! transition rather than an error. When the release phase completes, the
//! reward is taken from the handover outcome: online, the decision thread
//! blocks on the bus until the outcome resolves; offline, a fixed diagnostic
//! bonus is awarded for one known-good trajectory.

use crate::config::RunConfig;
use crate::model::{Action, Context, PHASE_COUNT, Phase, State, transition};
use colearn_proto::{EventBus, Outcome, OutcomeWait};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Bonus awarded offline for the diagnostic trajectory.
pub const DIAGNOSTIC_BONUS: f64 = 20.0;

/// Per-phase states that earn the diagnostic bonus (phases 1, 2, 3).
const DIAGNOSTIC_TRAJECTORY: [usize; 3] = [2, 9, 14];

/// How the reward of a completed episode was determined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Success { time_left: f64 },
    Failure,
    /// Shutdown released the outcome wait before the handover resolved.
    Cancelled,
    /// Offline diagnostic reward; `bonus` tells whether it was awarded.
    Diagnostic { bonus: bool },
}

/// Side information reported with every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Whether the action was legal in the phase it was taken in.
    pub valid: bool,
    /// Phase after the step.
    pub phase: Phase,
    /// Set on the step that completes the release phase.
    pub outcome: Option<EpisodeOutcome>,
}

impl StepInfo {
    pub fn cancelled(&self) -> bool {
        self.outcome == Some(EpisodeOutcome::Cancelled)
    }
}

/// Result of [`PhaseEnvironment::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub state: State,
    pub reward: f64,
    pub terminated: bool,
    pub info: StepInfo,
}

/// Reward for a resolved handover.
///
/// Success earns ten per phase plus the remaining secondary-task time per
/// phase; failure costs ten per phase.
pub fn shaped_reward(outcome: Outcome, phase_count: u32) -> f64 {
    let phases = f64::from(phase_count);
    match outcome {
        Outcome::Success { time_left } => phases * 10.0 + phases * time_left,
        Outcome::Failure => -(phases * 10.0),
    }
}

/// The handover phase environment.
#[derive(Debug)]
pub struct PhaseEnvironment {
    bus: EventBus,
    online: bool,
    phase: Phase,
    state: State,
    max_episode_length: u32,
    steps_remaining: u32,
    phase_count: u32,
    last_state: [State; PHASE_COUNT],
}

impl PhaseEnvironment {
    /// Creates an environment reading sensor context from `bus`.
    ///
    /// A bus without an event source puts the environment in offline mode.
    pub fn new(bus: EventBus, run: &RunConfig) -> Self {
        let online = bus.is_connected();
        if online {
            info!("Environment connected to event bus");
        } else {
            warn!("Event bus offline! Environment proceeds in offline mode");
        }
        Self {
            bus,
            online,
            phase: Phase::Home,
            state: State::HOME,
            max_episode_length: run.max_episode_length,
            steps_remaining: run.max_episode_length,
            phase_count: run.phase_count,
            last_state: [State::HOME; PHASE_COUNT],
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn steps_remaining(&self) -> u32 {
        self.steps_remaining
    }

    /// State recorded when `phase` was last entered this episode.
    pub fn last_state(&self, phase: Phase) -> State {
        self.last_state[phase.index()]
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Sensor context the next transition would use.
    pub fn context(&self) -> Context {
        Context {
            orientation: self.bus.orientation(),
            human_intent: self.bus.human_intent(),
        }
    }

    /// True iff `action` is legal in the current phase.
    pub fn check_valid(&self, action: Action) -> bool {
        self.phase.is_legal(action)
    }

    /// Applies `action` and returns the resulting state and reward.
    ///
    /// Blocks on the handover outcome when the action completes the release
    /// phase in online mode.
    pub fn step(&mut self, action: Action) -> StepResult {
        let valid = self.check_valid(action);
        let completes = valid && self.phase.is_terminal();

        self.steps_remaining = self.steps_remaining.saturating_sub(1);
        let terminated = self.steps_remaining == 0 || completes;

        if valid {
            if let Some(next) = transition(self.phase, action, self.context()) {
                self.state = next;
            }
            self.phase = if terminated {
                Phase::Home
            } else {
                self.phase.next().unwrap_or(Phase::Home)
            };
            self.last_state[self.phase.index()] = self.state;
        }

        let (reward, outcome) = if completes {
            let (reward, outcome) = self.obtain_reward();
            (reward, Some(outcome))
        } else {
            (0.0, None)
        };

        debug!(
            action = action.index(),
            valid,
            state = self.state.index(),
            phase = self.phase.index(),
            reward,
            terminated,
            steps_remaining = self.steps_remaining,
            "Environment step"
        );

        StepResult {
            state: self.state,
            reward,
            terminated,
            info: StepInfo {
                valid,
                phase: self.phase,
                outcome,
            },
        }
    }

    fn obtain_reward(&self) -> (f64, EpisodeOutcome) {
        if !self.online {
            let bonus = DIAGNOSTIC_TRAJECTORY
                .iter()
                .zip([Phase::TargetSelection, Phase::Approach, Phase::Release])
                .all(|(&expected, phase)| self.last_state(phase).index() == expected);
            let reward = if bonus { DIAGNOSTIC_BONUS } else { 0.0 };
            return (reward, EpisodeOutcome::Diagnostic { bonus });
        }

        debug!("Waiting for handover outcome");
        match self.bus.outcome().wait() {
            OutcomeWait::Resolved(outcome) => {
                let reward = shaped_reward(outcome, self.phase_count);
                let outcome = match outcome {
                    Outcome::Success { time_left } => EpisodeOutcome::Success { time_left },
                    Outcome::Failure => EpisodeOutcome::Failure,
                };
                info!(?outcome, reward, "Handover resolved");
                (reward, outcome)
            }
            OutcomeWait::Cancelled => {
                warn!("Outcome wait cancelled by shutdown");
                (0.0, EpisodeOutcome::Cancelled)
            }
        }
    }

    /// Starts a new episode: zeroes state, phase and step budget and forgets
    /// the previous episode's outcome.
    pub fn reset(&mut self) -> (State, Phase) {
        self.state = State::HOME;
        self.phase = Phase::Home;
        self.steps_remaining = self.max_episode_length;
        self.last_state = [State::HOME; PHASE_COUNT];
        self.bus.clear_episode_state();
        (self.state, self.phase)
    }
}
