//! Synchronized handover outcome cell.
//!
//! The outcome is written by the bus delivery thread and read by the decision
//! thread, which suspends on a condition variable until the handover resolves
//! or a shutdown cancels the wait. Pending notifications never wake a waiter.

use crate::event::{HandoverResult, OutcomeUpdate};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// A resolved handover outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// The human took the object; `time_left` is the remaining secondary-task time.
    Success { time_left: f64 },
    Failure,
}

/// Result of blocking on the outcome cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutcomeWait {
    Resolved(Outcome),
    /// Shutdown was requested before an outcome arrived.
    Cancelled,
}

#[derive(Debug, Default)]
struct Slot {
    outcome: Option<Outcome>,
    cancelled: bool,
}

/// Single-writer/single-reader cell holding the latest non-pending outcome.
#[derive(Debug, Default)]
pub struct OutcomeCell {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl OutcomeCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a status notification.
    ///
    /// Pending notifications are ignored. Returns true when the outcome was
    /// updated and the waiter notified.
    pub fn publish(&self, update: &OutcomeUpdate) -> bool {
        let outcome = match update.handover_successful {
            HandoverResult::Pending => return false,
            HandoverResult::Success => Outcome::Success {
                time_left: update.time_left,
            },
            HandoverResult::Failure => Outcome::Failure,
        };
        self.lock().outcome = Some(outcome);
        self.ready.notify_all();
        true
    }

    /// Blocks until an outcome is available or the cell is cancelled.
    ///
    /// An outcome that is already present wins over a cancellation.
    pub fn wait(&self) -> OutcomeWait {
        let guard = self
            .ready
            .wait_while(self.lock(), |slot| {
                slot.outcome.is_none() && !slot.cancelled
            })
            .unwrap_or_else(PoisonError::into_inner);
        Self::resolve(&guard)
    }

    fn resolve(slot: &Slot) -> OutcomeWait {
        match slot.outcome {
            Some(outcome) => OutcomeWait::Resolved(outcome),
            None => OutcomeWait::Cancelled,
        }
    }

    /// Returns the stored outcome without blocking.
    pub fn peek(&self) -> Option<Outcome> {
        self.lock().outcome
    }

    /// Returns the cell to pending. Cancellation is sticky and is not cleared.
    pub fn clear(&self) {
        self.lock().outcome = None;
    }

    /// Cancels current and future waits.
    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.ready.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Bounded wait; `None` when nothing resolved the cell within `timeout`.
    fn wait_timeout(cell: &OutcomeCell, timeout: Duration) -> Option<OutcomeWait> {
        let (guard, result) = cell
            .ready
            .wait_timeout_while(cell.lock(), timeout, |slot| {
                slot.outcome.is_none() && !slot.cancelled
            })
            .unwrap();
        if result.timed_out() {
            return None;
        }
        Some(OutcomeCell::resolve(&guard))
    }

    fn status(result: HandoverResult, time_left: f64) -> OutcomeUpdate {
        OutcomeUpdate {
            handover_successful: result,
            time_left,
            draining_starts: 1.0,
        }
    }

    #[test]
    fn test_pending_is_ignored() {
        let cell = OutcomeCell::new();
        assert!(!cell.publish(&status(HandoverResult::Pending, 4.0)));
        assert_eq!(cell.peek(), None);
        assert_eq!(wait_timeout(&cell, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_waiter_wakes_on_success() {
        let cell = Arc::new(OutcomeCell::new());
        let writer = Arc::clone(&cell);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.publish(&status(HandoverResult::Pending, 0.0));
            writer.publish(&status(HandoverResult::Success, 3.0));
        });

        let started = Instant::now();
        let result = cell.wait();
        handle.join().unwrap();

        assert_eq!(
            result,
            OutcomeWait::Resolved(Outcome::Success { time_left: 3.0 })
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_releases_waiter() {
        let cell = Arc::new(OutcomeCell::new());
        let canceller = Arc::clone(&cell);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let started = Instant::now();
        assert_eq!(cell.wait(), OutcomeWait::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(500));
        handle.join().unwrap();
    }

    #[test]
    fn test_outcome_wins_over_cancel() {
        let cell = OutcomeCell::new();
        cell.publish(&status(HandoverResult::Failure, 0.0));
        cell.cancel();
        assert_eq!(cell.wait(), OutcomeWait::Resolved(Outcome::Failure));
    }

    #[test]
    fn test_clear_keeps_cancellation() {
        let cell = OutcomeCell::new();
        cell.publish(&status(HandoverResult::Success, 1.0));
        cell.cancel();
        cell.clear();
        assert_eq!(cell.peek(), None);
        assert!(cell.is_cancelled());
        assert_eq!(cell.wait(), OutcomeWait::Cancelled);
    }
}
