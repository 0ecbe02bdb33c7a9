//! Accumulating eligibility traces.

use crate::model::{Action, State};
use std::collections::HashMap;

/// Sparse per-episode eligibility traces keyed by (state, action).
///
/// Only pairs visited during the episode carry an entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EligibilityTraces {
    traces: HashMap<(State, Action), f64>,
}

impl EligibilityTraces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to the trace of the visited pair.
    pub fn visit(&mut self, state: State, action: Action) {
        *self.traces.entry((state, action)).or_insert(0.0) += 1.0;
    }

    pub fn get(&self, state: State, action: Action) -> f64 {
        self.traces.get(&(state, action)).copied().unwrap_or(0.0)
    }

    /// Multiplies every trace by `factor`.
    pub fn decay(&mut self, factor: f64) {
        for trace in self.traces.values_mut() {
            *trace *= factor;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ((State, Action), f64)> + '_ {
        self.traces.iter().map(|(&key, &value)| (key, value))
    }

    /// Number of visited pairs.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn clear(&mut self) {
        self.traces.clear();
    }
}
