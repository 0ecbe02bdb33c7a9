//! Scripted secondary task driven by the orchestrator's status broadcasts.

use colearn_proto::{
    EventBus, HandoverResult, Orientation, Outcome, OutcomeUpdate, PoseUpdate, StatusUpdate,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answers status broadcasts the way the human and the secondary task would.
///
/// - a reset request starts draining,
/// - a phase 1 broadcast without reset moves the hand to a new orientation,
/// - entering phase 3 resolves the handover with the next scripted outcome
///   (the script repeats when exhausted).
#[derive(Debug, Clone)]
pub struct ScriptedTask {
    outcomes: Vec<Outcome>,
}

impl ScriptedTask {
    pub fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    /// Installs the task as a bus observer and returns the counter of
    /// resolved handovers.
    ///
    /// The observer holds a clone of `bus`; call `EventBus::clear_observers`
    /// to release it.
    pub fn install(self, bus: &EventBus) -> Arc<AtomicUsize> {
        let resolved = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resolved);
        let driver = bus.clone();

        bus.add_observer(move |status: &StatusUpdate| {
            if status.reset {
                driver.deliver_outcome(OutcomeUpdate {
                    draining_starts: 1.0,
                    ..OutcomeUpdate::default()
                });
                return;
            }
            match status.phase {
                1 => {
                    let orientation = match driver.orientation() {
                        Orientation::Serve => Orientation::Drop,
                        _ => Orientation::Serve,
                    };
                    driver.deliver_pose(PoseUpdate {
                        orientation,
                        ..driver.pose()
                    });
                }
                3 if !self.outcomes.is_empty() => {
                    let index = counter.fetch_add(1, Ordering::SeqCst);
                    let (handover_successful, time_left) = match self.outcomes[index % self.outcomes.len()] {
                        Outcome::Success { time_left } => (HandoverResult::Success, time_left),
                        Outcome::Failure => (HandoverResult::Failure, 0.0),
                    };
                    driver.deliver_outcome(OutcomeUpdate {
                        handover_successful,
                        time_left,
                        draining_starts: 1.0,
                    });
                }
                _ => {}
            }
        });
        resolved
    }
}
