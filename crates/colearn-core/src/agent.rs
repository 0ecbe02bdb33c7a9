//! SARSA(λ) learning agent.
//!
//! The agent owns the Q-table, the episode's eligibility traces and the
//! recorded trajectory. Each decision is a two-call sequence:
//! [`choose_action`](SarsaAgent::choose_action) picks an ε-greedy legal action,
//! and [`observe_and_update`](SarsaAgent::observe_and_update) consumes the
//! environment's response and applies the trace update. [`train`](SarsaAgent::train)
//! runs both around one live environment step.
//!
//! Episode protocol:
//!
//! ```text
//! AwaitingDecision -> ActionChosen -> RewardObserved -> AwaitingDecision
//!                                                    \-> Terminated -> (replay) -> begin_episode
//! ```
//!
//! A step whose outcome wait was cancelled moves the agent to `Interrupted`
//! without touching the Q-table.

use crate::config::LearningConfig;
use crate::environment::{EpisodeOutcome, PhaseEnvironment, StepResult};
use crate::model::{Action, Phase, State};
use crate::q_table::{PersistError, QTable};
use crate::traces::EligibilityTraces;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Where the agent is within the current decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    AwaitingDecision,
    ActionChosen,
    RewardObserved,
    Terminated,
    /// Shutdown cancelled the reward of the last step.
    Interrupted,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentPhase::AwaitingDecision => "awaiting_decision",
            AgentPhase::ActionChosen => "action_chosen",
            AgentPhase::RewardObserved => "reward_observed",
            AgentPhase::Terminated => "terminated",
            AgentPhase::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// One recorded (s, a, r, s', a') step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transition {
    pub state: State,
    pub action: Action,
    pub reward: f64,
    pub next_state: State,
    /// On-policy successor action; `None` once the episode terminated.
    pub next_action: Option<Action>,
}

/// What the orchestrator needs after a training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutcome {
    /// The action that was taken and should now be executed on hardware.
    pub action: Action,
    /// Phase the environment moved to.
    pub phase: Phase,
    pub terminated: bool,
    pub reward: f64,
    /// The step's reward wait was cancelled; nothing was learned.
    pub interrupted: bool,
    /// How the reward was determined, on the step that completed the episode.
    pub episode_outcome: Option<EpisodeOutcome>,
}

/// Agent protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("cannot {operation} while the agent is {phase}")]
    Protocol {
        operation: &'static str,
        phase: AgentPhase,
    },

    #[error("experience replay must run before the next episode starts")]
    ReplayRequired,
}

/// Tabular SARSA(λ) agent with ε-greedy exploration over legal actions.
#[derive(Debug)]
pub struct SarsaAgent {
    q_table: QTable,
    traces: EligibilityTraces,
    trajectory: Vec<Transition>,
    rng: StdRng,
    phase: AgentPhase,
    chosen: Option<(State, Action)>,
    next_action: Option<Action>,
    replayed: bool,
}

impl SarsaAgent {
    /// Creates an agent around `q_table`.
    ///
    /// A seed makes exploration reproducible.
    pub fn new(q_table: QTable, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            q_table,
            traces: EligibilityTraces::new(),
            trajectory: Vec::new(),
            rng,
            phase: AgentPhase::AwaitingDecision,
            chosen: None,
            next_action: None,
            replayed: false,
        }
    }

    pub fn q_table(&self) -> &QTable {
        &self.q_table
    }

    pub fn traces(&self) -> &EligibilityTraces {
        &self.traces
    }

    /// Transitions recorded since the episode began.
    pub fn trajectory(&self) -> &[Transition] {
        &self.trajectory
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Greedy legal action for `state` with no exploration.
    pub fn greedy_action(&self, state: State, phase: Phase) -> Action {
        self.q_table.greedy(state, phase)
    }

    fn select(&mut self, state: State, phase: Phase, exploration: f64) -> Action {
        let legal = phase.legal_actions();
        if self.rng.r#gen::<f64>() < exploration {
            if let Some(&action) = legal.choose(&mut self.rng) {
                return action;
            }
        }
        self.q_table.greedy(state, phase)
    }

    fn expect_phase(&self, expected: AgentPhase, operation: &'static str) -> Result<(), AgentError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(AgentError::Protocol {
                operation,
                phase: self.phase,
            })
        }
    }

    /// Picks the action to take in `state`.
    ///
    /// The successor action drawn during the previous update is reused so the
    /// update target and the executed action agree.
    pub fn choose_action(
        &mut self,
        state: State,
        phase: Phase,
        exploration: f64,
    ) -> Result<Action, AgentError> {
        self.expect_phase(AgentPhase::AwaitingDecision, "choose an action")?;
        let action = match self.next_action.take() {
            Some(action) if phase.is_legal(action) => action,
            _ => self.select(state, phase, exploration),
        };
        self.chosen = Some((state, action));
        self.phase = AgentPhase::ActionChosen;
        debug!(state = state.index(), phase = phase.index(), action = action.index(), exploration, "Action chosen");
        Ok(action)
    }

    /// Consumes the environment's response to the chosen action and applies
    /// the SARSA(λ) update.
    pub fn observe_and_update(
        &mut self,
        step: &StepResult,
        params: &LearningConfig,
        exploration: f64,
    ) -> Result<TrainOutcome, AgentError> {
        self.expect_phase(AgentPhase::ActionChosen, "observe a reward")?;
        let Some((state, action)) = self.chosen.take() else {
            return Err(AgentError::Protocol {
                operation: "observe a reward",
                phase: self.phase,
            });
        };

        if step.info.cancelled() {
            self.phase = AgentPhase::Interrupted;
            info!(state = state.index(), action = action.index(), "Reward cancelled, skipping update");
            return Ok(TrainOutcome {
                action,
                phase: step.info.phase,
                terminated: true,
                reward: 0.0,
                interrupted: true,
                episode_outcome: step.info.outcome,
            });
        }
        self.phase = AgentPhase::RewardObserved;

        let next_action = if step.terminated {
            None
        } else {
            Some(self.select(step.state, step.info.phase, exploration))
        };
        let transition = Transition {
            state,
            action,
            reward: step.reward,
            next_state: step.state,
            next_action,
        };
        apply_update(&mut self.q_table, &mut self.traces, &transition, params);
        self.trajectory.push(transition);
        self.next_action = next_action;

        self.phase = if step.terminated {
            AgentPhase::Terminated
        } else {
            AgentPhase::AwaitingDecision
        };

        Ok(TrainOutcome {
            action,
            phase: step.info.phase,
            terminated: step.terminated,
            reward: step.reward,
            interrupted: false,
            episode_outcome: step.info.outcome,
        })
    }

    /// One training step.
    ///
    /// In real time the chosen action is stepped through `env` and learned
    /// from immediately. Otherwise only the decision is made; the caller
    /// steps the environment and finishes with
    /// [`observe_and_update`](Self::observe_and_update).
    pub fn train(
        &mut self,
        env: &mut PhaseEnvironment,
        params: &LearningConfig,
        exploration: f64,
        real_time: bool,
    ) -> Result<TrainOutcome, AgentError> {
        let action = self.choose_action(env.state(), env.phase(), exploration)?;
        if !real_time {
            return Ok(TrainOutcome {
                action,
                phase: env.phase(),
                terminated: false,
                reward: 0.0,
                interrupted: false,
                episode_outcome: None,
            });
        }
        let step = env.step(action);
        self.observe_and_update(&step, params, exploration)
    }

    /// Replays the finished episode's trajectory through the same update with
    /// fresh traces. Returns the number of transitions replayed.
    pub fn experience_replay(&mut self, params: &LearningConfig) -> Result<usize, AgentError> {
        self.expect_phase(AgentPhase::Terminated, "replay experience")?;
        let mut traces = EligibilityTraces::new();
        for transition in &self.trajectory {
            apply_update(&mut self.q_table, &mut traces, transition, params);
        }
        self.replayed = true;
        debug!(transitions = self.trajectory.len(), "Experience replay complete");
        Ok(self.trajectory.len())
    }

    /// Clears traces and trajectory for a new episode.
    ///
    /// A terminated episode must have been replayed first.
    pub fn begin_episode(&mut self) -> Result<(), AgentError> {
        if self.phase == AgentPhase::Terminated && !self.replayed {
            return Err(AgentError::ReplayRequired);
        }
        self.traces.clear();
        self.trajectory.clear();
        self.chosen = None;
        self.next_action = None;
        self.replayed = false;
        self.phase = AgentPhase::AwaitingDecision;
        Ok(())
    }

    /// Saves the Q-table.
    pub fn save_q_table(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        self.q_table.save(path)
    }

    /// Replaces the Q-table with the one at `path`, scaled by
    /// `persistence_factor` when given.
    pub fn load_q_table(
        &mut self,
        path: impl AsRef<Path>,
        persistence_factor: Option<f64>,
    ) -> Result<(), PersistError> {
        let mut table = QTable::load(path)?;
        if let Some(factor) = persistence_factor {
            table.scale(factor);
        }
        self.q_table = table;
        Ok(())
    }
}

/// `δ = r + γ·Q(s',a') − Q(s,a)`; `e(s,a) += 1`; `Q += α·δ·e` for every
/// traced pair; then `e *= γ·λ`.
fn apply_update(
    q_table: &mut QTable,
    traces: &mut EligibilityTraces,
    transition: &Transition,
    params: &LearningConfig,
) {
    let next_value = transition
        .next_action
        .map_or(0.0, |next| q_table.get(transition.next_state, next));
    let delta = transition.reward + params.discount_factor * next_value
        - q_table.get(transition.state, transition.action);

    traces.visit(transition.state, transition.action);
    for ((state, action), trace) in traces.iter() {
        q_table.add(state, action, params.learning_rate * delta * trace);
    }
    traces.decay(params.trace_decay * params.discount_factor);
}
