//! Tabular action-value function and its on-disk form.
//!
//! The table is dense over `STATE_COUNT × ACTION_COUNT`. On disk it is a JSON
//! document holding one row of Q-values per state, so a table saved by one
//! run can be inspected by hand and loaded by the next.

use crate::model::{ACTION_COUNT, Action, Phase, STATE_COUNT, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Learned Q-values indexed by (state, action).
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    values: Vec<f64>,
}

impl Default for QTable {
    fn default() -> Self {
        Self::zeros()
    }
}

impl QTable {
    /// An all-zero table.
    pub fn zeros() -> Self {
        Self {
            values: vec![0.0; STATE_COUNT * ACTION_COUNT],
        }
    }

    fn offset(state: State, action: Action) -> usize {
        state.index() * ACTION_COUNT + action.index()
    }

    pub fn get(&self, state: State, action: Action) -> f64 {
        self.values[Self::offset(state, action)]
    }

    pub fn set(&mut self, state: State, action: Action, value: f64) {
        self.values[Self::offset(state, action)] = value;
    }

    pub fn add(&mut self, state: State, action: Action, delta: f64) {
        self.values[Self::offset(state, action)] += delta;
    }

    /// All action values of one state.
    pub fn row(&self, state: State) -> &[f64] {
        let start = state.index() * ACTION_COUNT;
        &self.values[start..start + ACTION_COUNT]
    }

    /// The legal action with the highest value in `state`.
    ///
    /// Ties resolve to the earliest action in the phase's legal list.
    pub fn greedy(&self, state: State, phase: Phase) -> Action {
        let legal = phase.legal_actions();
        let mut best = legal[0];
        for &action in &legal[1..] {
            if self.get(state, action) > self.get(state, best) {
                best = action;
            }
        }
        best
    }

    /// Multiplies every value by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for value in &mut self.values {
            *value *= factor;
        }
    }

    /// Returns true if every entry is zero.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Saves the table as JSON, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = QTableFile {
            states: STATE_COUNT,
            actions: ACTION_COUNT,
            saved_at: Utc::now(),
            values: self
                .values
                .chunks(ACTION_COUNT)
                .map(<[f64]>::to_vec)
                .collect(),
        };

        // Readers only ever see a complete table.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Saved Q-table");
        Ok(())
    }

    /// Loads a table saved by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let file: QTableFile = serde_json::from_str(&content)?;

        if file.states != STATE_COUNT
            || file.actions != ACTION_COUNT
            || file.values.len() != STATE_COUNT
            || file.values.iter().any(|row| row.len() != ACTION_COUNT)
        {
            return Err(PersistError::Shape {
                expected_states: STATE_COUNT,
                expected_actions: ACTION_COUNT,
                states: file.values.len(),
                actions: file.values.first().map_or(0, Vec::len),
            });
        }

        debug!(path = %path.display(), saved_at = %file.saved_at, "Loaded Q-table");
        Ok(Self {
            values: file.values.into_iter().flatten().collect(),
        })
    }

    /// Loads `path` if it exists, scaling by `persistence_factor` when given.
    ///
    /// A missing file is not an error: the learner starts from zeros.
    pub fn load_or_zeros(
        path: impl AsRef<Path>,
        persistence_factor: Option<f64>,
    ) -> Result<Self, PersistError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Q-table file not found, starting from an all-zero table");
            return Ok(Self::zeros());
        }

        let mut table = Self::load(path)?;
        if let Some(factor) = persistence_factor {
            table.scale(factor);
            info!(path = %path.display(), factor, "Loaded Q-table with persistence factor");
        } else {
            info!(path = %path.display(), "Loaded Q-table");
        }
        Ok(table)
    }
}

/// On-disk representation.
#[derive(Debug, Serialize, Deserialize)]
struct QTableFile {
    states: usize,
    actions: usize,
    saved_at: DateTime<Utc>,
    values: Vec<Vec<f64>>,
}

/// Q-table persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "Q-table shape mismatch: expected {expected_states}x{expected_actions}, found {states}x{actions}"
    )]
    Shape {
        expected_states: usize,
        expected_actions: usize,
        states: usize,
        actions: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state(index: usize) -> State {
        State::new(index).unwrap()
    }

    #[test]
    fn test_greedy_only_considers_legal_actions() {
        let mut table = QTable::zeros();
        table.set(state(2), Action::OpenFully, 100.0);
        table.set(state(2), Action::DropPose, 1.0);
        assert_eq!(table.greedy(state(2), Phase::TargetSelection), Action::DropPose);
    }

    #[test]
    fn test_greedy_ties_pick_first_legal() {
        let table = QTable::zeros();
        assert_eq!(table.greedy(State::HOME, Phase::Home), Action::InitiateHandover);
        assert_eq!(table.greedy(state(9), Phase::Approach), Action::OpenFully);
    }

    #[test]
    fn test_scale() {
        let mut table = QTable::zeros();
        table.set(state(1), Action::ServePose, 4.0);
        table.scale(0.5);
        assert_eq!(table.get(state(1), Action::ServePose), 2.0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tables").join("q.json");

        let mut table = QTable::zeros();
        table.set(state(9), Action::OpenPartially, -3.25);
        table.set(state(16), Action::ReturnHome, 7.5);
        table.save(&path).unwrap();

        let loaded = QTable::load(&path).unwrap();
        assert_eq!(loaded, table);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_and_load_preserves_adjacent_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");

        let serve: f64 = 0.44064;
        let drop = f64::from_bits(serve.to_bits() + 1);
        let mut table = QTable::zeros();
        table.set(state(1), Action::ServePose, serve);
        table.set(state(1), Action::DropPose, drop);
        table.set(state(9), Action::OpenFully, 0.1 + 0.2);
        assert_eq!(table.greedy(state(1), Phase::TargetSelection), Action::DropPose);
        table.save(&path).unwrap();

        let loaded = QTable::load(&path).unwrap();
        assert_eq!(loaded.get(state(1), Action::DropPose).to_bits(), drop.to_bits());
        assert_eq!(loaded.get(state(9), Action::OpenFully), 0.1 + 0.2);
        for s in State::all() {
            let phase = s.phase();
            assert_eq!(loaded.greedy(s, phase), table.greedy(s, phase), "state {}", s.index());
        }
    }

    #[test]
    fn test_missing_file_gives_zeros() {
        let dir = TempDir::new().unwrap();
        let table = QTable::load_or_zeros(dir.path().join("absent.json"), Some(0.5)).unwrap();
        assert!(table.is_zero());
    }

    #[test]
    fn test_persistence_factor_applied_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");

        let mut table = QTable::zeros();
        table.set(state(4), Action::DropPose, 10.0);
        table.save(&path).unwrap();

        let loaded = QTable::load_or_zeros(&path, Some(0.5)).unwrap();
        assert_eq!(loaded.get(state(4), Action::DropPose), 5.0);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q.json");
        fs::write(
            &path,
            r#"{"states":2,"actions":8,"saved_at":"2026-01-01T00:00:00Z","values":[[0,0,0,0,0,0,0,0],[0,0,0,0,0,0,0,0]]}"#,
        )
        .unwrap();

        let err = QTable::load(&path).unwrap_err();
        assert!(matches!(err, PersistError::Shape { states: 2, .. }), "{err:?}");
    }
}
