//! Configuration types for the CoLearn handover learner.
//!
//! All values are plain scalars loaded from YAML. Every section is optional;
//! missing keys fall back to the defaults used on the lab setup, and unknown
//! keys are ignored for forward compatibility.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A 7-joint arm configuration in radians.
pub type JointVector = [f64; 7];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoLearnConfig {
    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub exploration: ExplorationConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub poses: PoseConfig,
}

/// SARSA(λ) hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Step size α.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Discount factor γ.
    #[serde(default = "default_discount_factor")]
    pub discount_factor: f64,

    /// Trace decay λ.
    #[serde(default = "default_trace_decay")]
    pub trace_decay: f64,
}

fn default_learning_rate() -> f64 {
    0.15
}

fn default_discount_factor() -> f64 {
    0.8
}

fn default_trace_decay() -> f64 {
    0.3
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            discount_factor: default_discount_factor(),
            trace_decay: default_trace_decay(),
        }
    }
}

/// Exploration schedule across episodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// Exploration factor for the first episode.
    #[serde(default = "default_initial_exploration")]
    pub initial: f64,

    /// Multiplicative decay applied after each episode.
    #[serde(default = "default_exploration_decay")]
    pub decay: f64,

    /// Lower bound the factor never drops below.
    #[serde(default = "default_exploration_floor")]
    pub floor: f64,

    /// Seed for the exploration RNG; entropy-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_initial_exploration() -> f64 {
    0.8
}

fn default_exploration_decay() -> f64 {
    0.95
}

fn default_exploration_floor() -> f64 {
    0.05
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            initial: default_initial_exploration(),
            decay: default_exploration_decay(),
            floor: default_exploration_floor(),
            seed: None,
        }
    }
}

/// Episode and run budgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of episodes to run before stopping.
    #[serde(default = "default_num_test_runs")]
    pub num_test_runs: u32,

    /// Step budget per episode.
    #[serde(default = "default_max_episode_length")]
    pub max_episode_length: u32,

    /// Multiplier used by online reward shaping.
    #[serde(default = "default_phase_count")]
    pub phase_count: u32,
}

fn default_num_test_runs() -> u32 {
    10
}

fn default_max_episode_length() -> u32 {
    100
}

fn default_phase_count() -> u32 {
    4
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_test_runs: default_num_test_runs(),
            max_episode_length: default_max_episode_length(),
            phase_count: default_phase_count(),
        }
    }
}

/// Q-table persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Table loaded at start-up (if present) and saved on exit.
    #[serde(default)]
    pub q_table_path: Option<PathBuf>,

    /// Scale applied to a loaded table to down-weight earlier learning.
    #[serde(default)]
    pub persistence_factor: Option<f64>,

    #[serde(default = "default_true")]
    pub save_on_exit: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            q_table_path: None,
            persistence_factor: None,
            save_on_exit: true,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Force offline mode even when an event source is configured.
    #[serde(default)]
    pub offline: bool,

    /// Polling period of the orchestrator's handover-initiation waits.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    200
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            offline: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Arm poses and grasp timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    #[serde(default = "default_home_pose")]
    pub home: JointVector,

    #[serde(default = "default_intermediate_pose")]
    pub intermediate: JointVector,

    #[serde(default = "default_serve_pose")]
    pub serve: JointVector,

    #[serde(default = "default_drop_pose")]
    pub drop: JointVector,

    /// Duration hint passed with every grasp command.
    #[serde(default = "default_grasp_duration_ms")]
    pub grasp_duration_ms: u64,
}

fn default_home_pose() -> JointVector {
    [FRAC_PI_2, FRAC_PI_4, 0.0, -FRAC_PI_4, 0.0, FRAC_PI_4, 0.0]
}

fn default_intermediate_pose() -> JointVector {
    [FRAC_PI_2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
}

fn degrees(values: [f64; 7]) -> JointVector {
    values.map(f64::to_radians)
}

fn default_serve_pose() -> JointVector {
    degrees([107.0, -47.0, -11.0, 100.0, -82.0, -82.0, -35.0])
}

fn default_drop_pose() -> JointVector {
    degrees([55.0, -40.0, -8.0, 82.0, 5.0, 20.0, 0.0])
}

fn default_grasp_duration_ms() -> u64 {
    1000
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            home: default_home_pose(),
            intermediate: default_intermediate_pose(),
            serve: default_serve_pose(),
            drop: default_drop_pose(),
            grasp_duration_ms: default_grasp_duration_ms(),
        }
    }
}

impl PoseConfig {
    pub fn grasp_duration(&self) -> Duration {
        Duration::from_millis(self.grasp_duration_ms)
    }
}

impl CoLearnConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(
            episodes = config.run.num_test_runs,
            learning_rate = config.learning.learning_rate,
            exploration = config.exploration.initial,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validates value ranges.
    ///
    /// Returns warnings for suspicious but usable values; hard errors for
    /// values the learner cannot run with.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        let unit_fields = [
            ("learning.learning_rate", self.learning.learning_rate),
            ("learning.discount_factor", self.learning.discount_factor),
            ("learning.trace_decay", self.learning.trace_decay),
            ("exploration.initial", self.exploration.initial),
            ("exploration.decay", self.exploration.decay),
            ("exploration.floor", self.exploration.floor),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be within [0, 1], got {value}"),
                });
            }
        }

        if self.run.max_episode_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "run.max_episode_length".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if let Some(factor) = self.persistence.persistence_factor {
            if factor < 0.0 || !factor.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: "persistence.persistence_factor".to_string(),
                    message: format!("must be a non-negative number, got {factor}"),
                });
            }
        }

        if self.run.num_test_runs == 0 {
            warnings.push(ConfigWarning::Suspicious {
                field: "run.num_test_runs".to_string(),
                message: "no episodes will run".to_string(),
            });
        }

        if self.exploration.floor > self.exploration.initial {
            warnings.push(ConfigWarning::Suspicious {
                field: "exploration.floor".to_string(),
                message: format!(
                    "floor {} is above the initial factor {}; the floor is used from the first episode",
                    self.exploration.floor, self.exploration.initial
                ),
            });
        }

        if self.learning.learning_rate == 0.0 {
            warnings.push(ConfigWarning::Suspicious {
                field: "learning.learning_rate".to_string(),
                message: "a zero learning rate leaves the Q-table unchanged".to_string(),
            });
        }

        if self.persistence.persistence_factor.is_some() && self.persistence.q_table_path.is_none()
        {
            warnings.push(ConfigWarning::Suspicious {
                field: "persistence.persistence_factor".to_string(),
                message: "ignored without persistence.q_table_path".to_string(),
            });
        }

        Ok(warnings)
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// A value that is valid but probably not intended.
    Suspicious { field: String, message: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::Suspicious { field, message } => {
                write!(f, "Warning [{field}]: {message}")
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}
