//! Event bus adapter between the sensor delivery threads and the decision loop.
//!
//! Inbound events are folded into last-value cells: pose and intent are
//! last-value-wins, task status keeps the most recent notification, and
//! non-pending outcomes additionally wake the decision thread through the
//! [`OutcomeCell`]. Outbound [`StatusUpdate`]s are handed to every registered
//! observer, which is where a transport or a recorder plugs in.
//!
//! The bus is a cheap cloneable handle; every clone refers to the same cells.

use crate::event::{InboundEvent, IntentUpdate, Orientation, OutcomeUpdate, PoseUpdate, StatusUpdate};
use crate::outcome::OutcomeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Type alias for the observer callback function.
type Observer = Arc<dyn Fn(&StatusUpdate) + Send + Sync + 'static>;

#[derive(Default)]
struct Shared {
    pose: Mutex<PoseUpdate>,
    intent: AtomicBool,
    task_status: Mutex<OutcomeUpdate>,
    outcome: OutcomeCell,
    shutdown: AtomicBool,
    observers: Mutex<Vec<Observer>>,
}

/// Shared hub for sensor values and status broadcasts.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
    connected: bool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::offline()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("connected", &self.connected)
            .field("pose", &self.pose())
            .field("intent", &self.human_intent())
            .field("task_status", &self.task_status())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus backed by a live event source.
    pub fn connected() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            connected: true,
        }
    }

    /// Creates a bus with no event source.
    ///
    /// Sensor reads return their defaults and no outcome will ever arrive, so
    /// consumers must not block on it.
    pub fn offline() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            connected: false,
        }
    }

    /// Returns true when an event source feeds this bus.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery side (called from bus threads)
    // ─────────────────────────────────────────────────────────────────────────

    /// Delivers an inbound event to the matching cell.
    pub fn deliver(&self, event: InboundEvent) {
        trace!(topic = event.topic(), "Delivering inbound event");
        match event {
            InboundEvent::Pose(pose) => self.deliver_pose(pose),
            InboundEvent::Intent(intent) => self.deliver_intent(intent),
            InboundEvent::Outcome(status) => self.deliver_outcome(status),
        }
    }

    pub fn deliver_pose(&self, pose: PoseUpdate) {
        *self
            .shared
            .pose
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = pose;
    }

    pub fn deliver_intent(&self, intent: IntentUpdate) {
        self.shared.intent.store(intent.active, Ordering::SeqCst);
    }

    /// Records the latest task status and wakes an outcome waiter if the
    /// handover has resolved.
    pub fn deliver_outcome(&self, status: OutcomeUpdate) {
        *self
            .shared
            .task_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = status;
        if self.shared.outcome.publish(&status) {
            debug!(result = ?status.handover_successful, time_left = status.time_left, "Handover outcome received");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decision side
    // ─────────────────────────────────────────────────────────────────────────

    pub fn pose(&self) -> PoseUpdate {
        *self
            .shared
            .pose
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn orientation(&self) -> Orientation {
        self.pose().orientation
    }

    pub fn human_intent(&self) -> bool {
        self.shared.intent.load(Ordering::SeqCst)
    }

    pub fn task_status(&self) -> OutcomeUpdate {
        *self
            .shared
            .task_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The blocking outcome cell.
    pub fn outcome(&self) -> &OutcomeCell {
        &self.shared.outcome
    }

    /// Forgets the previous episode's task status and outcome.
    pub fn clear_episode_state(&self) {
        *self
            .shared
            .task_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = OutcomeUpdate::default();
        self.shared.outcome.clear();
    }

    /// Adds an observer that receives every published status update.
    ///
    /// Multiple observers can be added (e.g., transport + recorder).
    /// Observers run outside the observer lock and may publish back onto
    /// the bus.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&StatusUpdate) + Send + Sync + 'static,
    {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Clears all observer callbacks.
    pub fn clear_observers(&self) {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Broadcasts a status update to all observers.
    ///
    /// Returns the number of observers that received it.
    pub fn publish(&self, status: StatusUpdate) -> usize {
        let observers: Vec<Observer> = self
            .shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer(&status);
        }
        trace!(phase = status.phase, reset = status.reset, "Published status update");
        observers.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// Requests a cooperative shutdown and releases any blocked outcome wait.
    pub fn request_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.outcome.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HandoverResult;
    use crate::outcome::{Outcome, OutcomeWait};
    use std::thread;

    #[test]
    fn test_pose_and_intent_last_value_wins() {
        let bus = EventBus::connected();
        bus.deliver(InboundEvent::Pose(PoseUpdate {
            orientation: Orientation::Serve,
            ..PoseUpdate::default()
        }));
        bus.deliver(InboundEvent::Pose(PoseUpdate {
            orientation: Orientation::Drop,
            ..PoseUpdate::default()
        }));
        bus.deliver(InboundEvent::Intent(IntentUpdate { active: true }));

        assert_eq!(bus.orientation(), Orientation::Drop);
        assert!(bus.human_intent());
    }

    #[test]
    fn test_clones_share_cells() {
        let bus = EventBus::connected();
        let delivery = bus.clone();

        thread::spawn(move || {
            delivery.deliver_outcome(OutcomeUpdate {
                handover_successful: HandoverResult::Success,
                time_left: 2.0,
                draining_starts: 1.0,
            });
        })
        .join()
        .unwrap();

        assert_eq!(bus.task_status().draining_starts, 1.0);
        assert_eq!(
            bus.outcome().wait(),
            OutcomeWait::Resolved(Outcome::Success { time_left: 2.0 })
        );
    }

    #[test]
    fn test_pending_status_updates_draining_only() {
        let bus = EventBus::connected();
        bus.deliver_outcome(OutcomeUpdate {
            handover_successful: HandoverResult::Pending,
            time_left: 0.0,
            draining_starts: 5.0,
        });
        assert_eq!(bus.task_status().draining_starts, 5.0);
        assert_eq!(bus.outcome().peek(), None);
    }

    #[test]
    fn test_observers_receive_all_status_updates() {
        let bus = EventBus::offline();
        let observed: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        let observed_clone = Arc::clone(&observed);
        bus.add_observer(move |status| {
            observed_clone.lock().unwrap().push(status.phase);
        });

        assert_eq!(bus.publish(StatusUpdate::phase(1)), 1);
        bus.publish(StatusUpdate::phase(2).with_reset(true));

        assert_eq!(*observed.lock().unwrap(), vec![1, 2]);

        bus.clear_observers();
        assert_eq!(bus.publish(StatusUpdate::phase(3)), 0);
        assert_eq!(observed.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_observer_can_publish_follow_up() {
        let bus = EventBus::offline();
        let observed: Arc<Mutex<Vec<StatusUpdate>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&observed);
        let echo = bus.clone();
        bus.add_observer(move |status| {
            sink.lock().unwrap().push(*status);
            if status.reset {
                echo.publish(StatusUpdate::phase(status.phase));
            }
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let publisher = bus.clone();
        thread::spawn(move || {
            publisher.publish(StatusUpdate::phase(1).with_reset(true));
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(std::time::Duration::from_secs(2)).is_ok(),
            "re-entrant publish did not return"
        );
        bus.clear_observers();
        assert_eq!(
            *observed.lock().unwrap(),
            vec![StatusUpdate::phase(1).with_reset(true), StatusUpdate::phase(1)]
        );
    }

    #[test]
    fn test_shutdown_cancels_outcome_wait() {
        let bus = EventBus::connected();
        let handle = bus.clone();
        let waiter = thread::spawn(move || handle.outcome().wait());

        bus.request_shutdown();

        assert_eq!(waiter.join().unwrap(), OutcomeWait::Cancelled);
        assert!(bus.is_shutdown_requested());
    }

    #[test]
    fn test_clear_episode_state() {
        let bus = EventBus::connected();
        bus.deliver_outcome(OutcomeUpdate {
            handover_successful: HandoverResult::Failure,
            time_left: 0.0,
            draining_starts: 1.0,
        });
        bus.clear_episode_state();
        assert_eq!(bus.task_status(), OutcomeUpdate::default());
        assert_eq!(bus.outcome().peek(), None);
    }
}
