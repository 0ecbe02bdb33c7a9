//! Episode orchestration.
//!
//! The orchestrator drives the decision thread: it executes the hardware
//! commands implied by the current phase, asks the agent for the next
//! real-time training step, and runs the end-of-episode bookkeeping
//! (experience replay, exploration decay, reset) until the run budget is
//! spent or a shutdown is requested.

use crate::agent::{AgentError, SarsaAgent};
use crate::config::CoLearnConfig;
use crate::environment::{EpisodeOutcome, PhaseEnvironment};
use crate::exploration::ExplorationSchedule;
use crate::hardware::HandoverHardware;
use crate::model::{Action, Phase};
use crate::q_table::{PersistError, QTable};
use colearn_proto::{EventBus, HandoverResult, StatusUpdate};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Gripper opening for the home configuration.
const GRASP_CLOSED: u8 = 0;
const GRASP_PARTIAL: u8 = 30;
const GRASP_FULL: u8 = 100;

/// Reason the run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// All configured episodes completed.
    RunBudgetExhausted,
    /// Interrupted by signal (SIGINT/SIGTERM).
    Interrupted,
    /// A hardware command failed.
    HardwareFailure,
}

impl TerminationReason {
    /// Process exit code for this termination reason.
    ///
    /// - 0: run budget exhausted (success)
    /// - 1: hardware failure
    /// - 130: user interrupt (SIGINT = 128 + 2)
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminationReason::RunBudgetExhausted => 0,
            TerminationReason::HardwareFailure => 1,
            TerminationReason::Interrupted => 130,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::RunBudgetExhausted => "run_budget_exhausted",
            TerminationReason::Interrupted => "interrupted",
            TerminationReason::HardwareFailure => "hardware_failure",
        }
    }
}

/// Errors that stop a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A hardware command failed. The Q-table was written to `table_saved`
    /// when a path is configured.
    #[error("hardware command failed: {source}")]
    Hardware {
        source: colearn_proto::Error,
        table_saved: Option<PathBuf>,
    },

    #[error("failed to persist Q-table: {0}")]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl OrchestratorError {
    /// Termination reason reported for this error.
    pub fn termination_reason(&self) -> TerminationReason {
        TerminationReason::HardwareFailure
    }
}

/// Summary of one finished episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpisodeSummary {
    /// Episode number (1-indexed).
    pub episode: u32,
    /// Total reward collected.
    pub reward: f64,
    /// Environment steps taken.
    pub steps: u32,
    /// Exploration factor the episode ran with.
    pub exploration: f64,
    /// Transitions replayed after the episode.
    pub replayed: usize,
    pub outcome: Option<EpisodeOutcome>,
}

/// Current state of the run.
#[derive(Debug)]
pub struct RunState {
    /// Current episode (1-indexed).
    pub episode: u32,
    /// Phase the environment is in.
    pub phase: Phase,
    /// Last action taken; executed by the next phase handler.
    pub action: Action,
    pub terminated: bool,
    /// Reward collected in the current episode.
    pub episode_reward: f64,
    /// Steps taken in the current episode.
    pub episode_steps: u32,
    pub last_outcome: Option<EpisodeOutcome>,
    /// Episodes finished so far.
    pub completed_episodes: u32,
    pub started_at: Instant,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            episode: 1,
            phase: Phase::Home,
            action: Action::ReturnHome,
            terminated: false,
            episode_reward: 0.0,
            episode_steps: 0,
            last_outcome: None,
            completed_episodes: 0,
            started_at: Instant::now(),
        }
    }
}

impl RunState {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// What the loop does after one iteration.
enum Progress {
    Continue,
    Stop(TerminationReason),
}

/// Whether a phase handler ran to completion.
#[derive(Debug, PartialEq, Eq)]
enum Dispatch {
    Done,
    Interrupted,
}

type SummaryObserver = Box<dyn Fn(&EpisodeSummary) + Send + 'static>;

/// Drives episodes of the handover protocol.
pub struct EpisodeOrchestrator<H> {
    config: CoLearnConfig,
    bus: EventBus,
    env: PhaseEnvironment,
    agent: SarsaAgent,
    hardware: H,
    exploration: ExplorationSchedule,
    state: RunState,
    summary_observers: Vec<SummaryObserver>,
}

impl<H: HandoverHardware> EpisodeOrchestrator<H> {
    /// Creates an orchestrator, loading the Q-table from the configured path
    /// when one is set.
    pub fn new(config: CoLearnConfig, bus: EventBus, hardware: H) -> Result<Self, OrchestratorError> {
        let q_table = match &config.persistence.q_table_path {
            Some(path) => QTable::load_or_zeros(path, config.persistence.persistence_factor)?,
            None => QTable::zeros(),
        };
        Ok(Self::with_q_table(config, bus, hardware, q_table))
    }

    /// Creates an orchestrator starting from `q_table`.
    pub fn with_q_table(config: CoLearnConfig, bus: EventBus, hardware: H, q_table: QTable) -> Self {
        let env = PhaseEnvironment::new(bus.clone(), &config.run);
        let agent = SarsaAgent::new(q_table, config.exploration.seed);
        let exploration = ExplorationSchedule::from_config(&config.exploration);
        Self {
            config,
            bus,
            env,
            agent,
            hardware,
            exploration,
            state: RunState::default(),
            summary_observers: Vec::new(),
        }
    }

    /// Adds an observer called with the summary of every finished episode.
    pub fn on_episode_end<F>(&mut self, observer: F)
    where
        F: Fn(&EpisodeSummary) + Send + 'static,
    {
        self.summary_observers.push(Box::new(observer));
    }

    pub fn config(&self) -> &CoLearnConfig {
        &self.config
    }

    pub fn agent(&self) -> &SarsaAgent {
        &self.agent
    }

    pub fn environment(&self) -> &PhaseEnvironment {
        &self.env
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn exploration(&self) -> &ExplorationSchedule {
        &self.exploration
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Runs episodes until the run budget is exhausted, a shutdown is
    /// requested, or a hardware command fails.
    pub fn run(&mut self) -> Result<TerminationReason, OrchestratorError> {
        info!(
            episodes = self.config.run.num_test_runs,
            online = self.env.is_online(),
            exploration = self.exploration.value(),
            "Starting handover run"
        );
        if self.config.run.num_test_runs == 0 {
            warn!("num_test_runs is 0, nothing to run");
            return self.finish(TerminationReason::RunBudgetExhausted);
        }

        loop {
            if self.bus.is_shutdown_requested() {
                // A finished episode still gets its replay pass.
                if self.state.terminated {
                    self.close_episode()?;
                }
                return self.finish(TerminationReason::Interrupted);
            }

            let progress = if self.state.terminated {
                self.end_episode()
            } else {
                self.step()
            };

            match progress {
                Ok(Progress::Continue) => {}
                Ok(Progress::Stop(reason)) => return self.finish(reason),
                Err(OrchestratorError::Hardware { source, .. }) => {
                    return Err(self.abort(source));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Executes the current phase's hardware commands, then one real-time
    /// training step.
    fn step(&mut self) -> Result<Progress, OrchestratorError> {
        let phase = self.env.phase();
        let action = self.state.action;
        info!(episode = self.state.episode, phase = phase.index(), action = action.index(), "Dispatching phase");

        if self.dispatch(phase, action)? == Dispatch::Interrupted {
            return Ok(Progress::Stop(TerminationReason::Interrupted));
        }

        let outcome = self.agent.train(
            &mut self.env,
            &self.config.learning,
            self.exploration.value(),
            true,
        )?;

        self.state.episode_steps += 1;
        self.state.episode_reward += outcome.reward;
        if outcome.episode_outcome.is_some() {
            self.state.last_outcome = outcome.episode_outcome;
        }
        if outcome.interrupted {
            return Ok(Progress::Stop(TerminationReason::Interrupted));
        }

        if outcome.phase != phase {
            self.bus.publish(self.status(false));
        }
        self.state.action = outcome.action;
        self.state.phase = outcome.phase;
        self.state.terminated = outcome.terminated;
        Ok(Progress::Continue)
    }

    fn dispatch(&mut self, phase: Phase, action: Action) -> Result<Dispatch, OrchestratorError> {
        match phase {
            Phase::Home => self.go_home(),
            Phase::TargetSelection => Ok(self.await_handover_start(action)),
            Phase::Approach => self.approach(action),
            Phase::Release => self.release(action),
        }
    }

    fn go_home(&mut self) -> Result<Dispatch, OrchestratorError> {
        let poses = &self.config.poses;
        let (intermediate, home, duration) = (poses.intermediate, poses.home, poses.grasp_duration());
        self.command(|hw| hw.send_joint_position_command(&intermediate))?;
        self.command(|hw| hw.send_joint_position_command(&home))?;
        self.command(|hw| hw.send_grasp_command(GRASP_CLOSED, duration))?;
        Ok(Dispatch::Done)
    }

    /// Holds the secondary task in reset until draining starts; after
    /// `WaitForIntent` also waits for the hand orientation to change.
    fn await_handover_start(&mut self, action: Action) -> Dispatch {
        if !self.env.is_online() {
            debug!("Offline, skipping handover start wait");
            return Dispatch::Done;
        }
        let interval = self.config.bus.poll_interval();

        loop {
            let status = self.bus.task_status();
            if status.draining_starts != 0.0 || status.handover_successful == HandoverResult::Failure {
                break;
            }
            if self.bus.is_shutdown_requested() {
                return Dispatch::Interrupted;
            }
            self.bus.publish(self.status(true));
            thread::sleep(interval);
        }

        if action == Action::WaitForIntent {
            let original = self.bus.orientation();
            self.bus.publish(self.status(false));
            debug!(orientation = %original, "Waiting for hand orientation to change");
            while self.bus.orientation() == original
                && self.bus.task_status().handover_successful != HandoverResult::Failure
            {
                if self.bus.is_shutdown_requested() {
                    return Dispatch::Interrupted;
                }
                thread::sleep(interval);
            }
        }
        Dispatch::Done
    }

    fn approach(&mut self, action: Action) -> Result<Dispatch, OrchestratorError> {
        let poses = &self.config.poses;
        let intermediate = poses.intermediate;
        let target = match action {
            Action::ServePose => poses.serve,
            Action::DropPose => poses.drop,
            _ => poses.home,
        };
        self.command(|hw| hw.send_joint_position_command(&intermediate))?;
        self.command(|hw| hw.send_joint_position_command(&target))?;
        self.command(|hw| hw.move_toward_last_known_hand())?;
        Ok(Dispatch::Done)
    }

    fn release(&mut self, action: Action) -> Result<Dispatch, OrchestratorError> {
        let duration = self.config.poses.grasp_duration();
        match action {
            Action::OpenFully => self.command(|hw| hw.send_grasp_command(GRASP_FULL, duration))?,
            Action::OpenPartially => self.command(|hw| hw.send_grasp_command(GRASP_PARTIAL, duration))?,
            _ => debug!("Holding object"),
        }
        Ok(Dispatch::Done)
    }

    /// Closes the episode, then either starts the next one or moves the arm
    /// to the safe configuration.
    fn end_episode(&mut self) -> Result<Progress, OrchestratorError> {
        self.close_episode()?;

        if self.state.episode >= self.config.run.num_test_runs {
            info!("Run budget exhausted, moving to safe configuration");
            let intermediate = self.config.poses.intermediate;
            self.command(|hw| hw.send_joint_position_command(&intermediate))?;
            return Ok(Progress::Stop(TerminationReason::RunBudgetExhausted));
        }

        self.state.episode += 1;
        self.reset_episode()?;
        Ok(Progress::Continue)
    }

    /// Replays the terminated episode, reports its summary, and decays
    /// exploration.
    fn close_episode(&mut self) -> Result<(), OrchestratorError> {
        let replayed = self.agent.experience_replay(&self.config.learning)?;
        let summary = EpisodeSummary {
            episode: self.state.episode,
            reward: self.state.episode_reward,
            steps: self.state.episode_steps,
            exploration: self.exploration.value(),
            replayed,
            outcome: self.state.last_outcome,
        };
        info!(
            episode = summary.episode,
            reward = summary.reward,
            steps = summary.steps,
            exploration = summary.exploration,
            "Episode finished"
        );
        for observer in &self.summary_observers {
            observer(&summary);
        }
        self.state.completed_episodes += 1;
        self.state.terminated = false;
        self.exploration.advance();
        Ok(())
    }

    fn reset_episode(&mut self) -> Result<(), OrchestratorError> {
        self.env.reset();
        self.agent.begin_episode()?;
        self.state.phase = Phase::Home;
        self.state.action = Action::ReturnHome;
        self.state.terminated = false;
        self.state.episode_reward = 0.0;
        self.state.episode_steps = 0;
        self.state.last_outcome = None;
        self.bus.publish(StatusUpdate::default());
        debug!(episode = self.state.episode, "Episode reset");
        Ok(())
    }

    fn status(&self, reset: bool) -> StatusUpdate {
        StatusUpdate {
            draining_starts: self.bus.task_status().draining_starts,
            ..StatusUpdate::phase(self.env.phase().index() as u8)
        }
        .with_reset(reset)
    }

    fn command<F>(&mut self, f: F) -> Result<(), OrchestratorError>
    where
        F: FnOnce(&mut H) -> colearn_proto::Result<()>,
    {
        f(&mut self.hardware).map_err(|source| OrchestratorError::Hardware {
            source,
            table_saved: None,
        })
    }

    /// Persists the table after a hardware failure and builds the error.
    fn abort(&mut self, source: colearn_proto::Error) -> OrchestratorError {
        error!(episode = self.state.episode, error = %source, "Hardware command failed, aborting run");
        let table_saved = match self.persist_table() {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Failed to persist Q-table after hardware failure");
                None
            }
        };
        OrchestratorError::Hardware { source, table_saved }
    }

    fn finish(&mut self, reason: TerminationReason) -> Result<TerminationReason, OrchestratorError> {
        if self.config.persistence.save_on_exit {
            self.persist_table()?;
        }
        info!(
            reason = reason.as_str(),
            episodes = self.state.completed_episodes,
            elapsed_secs = self.state.elapsed().as_secs_f64(),
            "Run finished"
        );
        Ok(reason)
    }

    fn persist_table(&self) -> Result<Option<PathBuf>, PersistError> {
        let Some(path) = &self.config.persistence.q_table_path else {
            return Ok(None);
        };
        self.agent.save_q_table(path)?;
        info!(path = %path.display(), "Saved Q-table");
        Ok(Some(path.clone()))
    }
}
