//! # colearn-core
//!
//! Online reinforcement learning core for robot-to-human handovers.
//!
//! This crate provides:
//! - The phase/state model and the phase environment
//! - The tabular SARSA(λ) agent with eligibility traces and experience replay
//! - The per-episode exploration schedule
//! - Q-table persistence
//! - The episode orchestrator and the hardware command interface
//! - Configuration loading and validation
//! - A JSONL inbound event feed and an episode recorder

mod agent;
mod config;
mod environment;
mod episode_recorder;
mod event_feed;
mod exploration;
mod hardware;
mod model;
mod orchestrator;
mod q_table;
pub mod testing;
mod traces;

pub use agent::{AgentError, AgentPhase, SarsaAgent, TrainOutcome, Transition};
pub use config::{
    BusConfig, CoLearnConfig, ConfigError, ConfigWarning, ExplorationConfig, JointVector,
    LearningConfig, PersistenceConfig, PoseConfig, RunConfig,
};
pub use environment::{
    DIAGNOSTIC_BONUS, EpisodeOutcome, PhaseEnvironment, StepInfo, StepResult, shaped_reward,
};
pub use episode_recorder::{EpisodeRecorder, Record};
pub use event_feed::{FeedLine, MalformedLine, ParseResult, parse_feed, read_feed, spawn_feed};
pub use exploration::ExplorationSchedule;
pub use hardware::{HandoverHardware, SimulatedHardware};
pub use model::{
    ACTION_COUNT, Action, Context, PHASE_COUNT, Phase, STATE_COUNT, State, transition,
};
pub use orchestrator::{
    EpisodeOrchestrator, EpisodeSummary, OrchestratorError, RunState, TerminationReason,
};
pub use q_table::{PersistError, QTable};
pub use traces::EligibilityTraces;
