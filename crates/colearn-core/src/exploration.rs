//! Per-episode exploration schedule.
//!
//! The orchestrator owns the schedule and hands the current factor to the
//! agent on every decision; the agent never decays it.

use crate::config::ExplorationConfig;

/// Multiplicative exploration decay with a floor.
///
/// The value is monotonically non-increasing across [`advance`](Self::advance)
/// calls and never drops below the floor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorationSchedule {
    decay: f64,
    floor: f64,
    current: f64,
    episodes: u32,
}

impl ExplorationSchedule {
    pub fn new(initial: f64, decay: f64, floor: f64) -> Self {
        let floor = floor.clamp(0.0, 1.0);
        Self {
            decay: decay.clamp(0.0, 1.0),
            floor,
            current: initial.clamp(0.0, 1.0).max(floor),
            episodes: 0,
        }
    }

    pub fn from_config(config: &ExplorationConfig) -> Self {
        Self::new(config.initial, config.decay, config.floor)
    }

    /// Exploration factor for the current episode.
    pub fn value(&self) -> f64 {
        self.current
    }

    /// Moves to the next episode and returns the new factor.
    pub fn advance(&mut self) -> f64 {
        self.episodes = self.episodes.saturating_add(1);
        self.current = (self.current * self.decay).max(self.floor);
        self.current
    }

    /// Number of completed `advance` calls.
    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }
}
