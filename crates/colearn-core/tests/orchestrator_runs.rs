//! Integration tests for EpisodeOrchestrator runs, offline and against a
//! scripted secondary task.

use colearn_core::testing::{HardwareCommand, RecordingHardware, ScriptedTask};
use colearn_core::{
    Action, AgentPhase, CoLearnConfig, EpisodeOrchestrator, EpisodeOutcome, EpisodeSummary,
    OrchestratorError, QTable, State, TerminationReason,
};
use colearn_proto::{EventBus, Outcome, StatusUpdate};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn greedy_config(episodes: u32) -> CoLearnConfig {
    let mut config = CoLearnConfig::default();
    config.run.num_test_runs = episodes;
    config.exploration.initial = 0.0;
    config.exploration.floor = 0.0;
    config.exploration.seed = Some(42);
    config.bus.poll_interval_ms = 1;
    config
}

fn collect_summaries<H: colearn_core::HandoverHardware>(
    orchestrator: &mut EpisodeOrchestrator<H>,
) -> Arc<Mutex<Vec<EpisodeSummary>>> {
    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&summaries);
    orchestrator.on_episode_end(move |summary| sink.lock().unwrap().push(*summary));
    summaries
}

#[test]
fn test_offline_episode_command_sequence() {
    let config = greedy_config(1);
    let poses = config.poses.clone();
    let mut orchestrator = EpisodeOrchestrator::with_q_table(
        config,
        EventBus::offline(),
        RecordingHardware::new(),
        QTable::zeros(),
    );

    assert_eq!(orchestrator.run().unwrap(), TerminationReason::RunBudgetExhausted);

    let duration = poses.grasp_duration();
    assert_eq!(
        orchestrator.hardware().commands(),
        &[
            HardwareCommand::JointPosition(poses.intermediate),
            HardwareCommand::JointPosition(poses.home),
            HardwareCommand::Grasp { open_percent: 0, duration },
            HardwareCommand::JointPosition(poses.intermediate),
            HardwareCommand::JointPosition(poses.serve),
            HardwareCommand::ReachTowardHand,
            HardwareCommand::Grasp { open_percent: 100, duration },
            HardwareCommand::JointPosition(poses.intermediate),
        ]
    );
}

#[test]
fn test_offline_run_learns_diagnostic_reward() {
    let mut orchestrator = EpisodeOrchestrator::with_q_table(
        greedy_config(3),
        EventBus::offline(),
        RecordingHardware::new(),
        QTable::zeros(),
    );
    let summaries = collect_summaries(&mut orchestrator);

    orchestrator.run().unwrap();

    let summaries = summaries.lock().unwrap();
    assert_eq!(summaries.len(), 3);
    for summary in summaries.iter() {
        assert_eq!(summary.reward, 20.0);
        assert_eq!(summary.steps, 4);
        assert_eq!(summary.replayed, 4);
        assert_eq!(summary.outcome, Some(EpisodeOutcome::Diagnostic { bonus: true }));
    }
    let q = orchestrator.agent().q_table();
    assert!(q.get(State::HOME, Action::InitiateHandover) > 0.0);
    assert_eq!(orchestrator.hardware().grasps(), vec![0, 100, 0, 100, 0, 100]);
}

#[test]
fn test_exploration_decays_per_episode() {
    let mut config = greedy_config(5);
    config.exploration.initial = 0.8;
    config.exploration.decay = 0.5;
    config.exploration.floor = 0.1;
    let mut orchestrator =
        EpisodeOrchestrator::with_q_table(config, EventBus::offline(), RecordingHardware::new(), QTable::zeros());
    let summaries = collect_summaries(&mut orchestrator);

    orchestrator.run().unwrap();

    let factors: Vec<f64> = summaries.lock().unwrap().iter().map(|s| s.exploration).collect();
    assert_eq!(factors, vec![0.8, 0.4, 0.2, 0.1, 0.1]);
}

#[test]
fn test_online_run_uses_handover_outcomes() {
    let bus = EventBus::connected();
    let resolved = ScriptedTask::new([Outcome::Success { time_left: 3.0 }, Outcome::Failure]).install(&bus);

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    bus.add_observer(move |status: &StatusUpdate| sink.lock().unwrap().push(*status));

    let mut orchestrator =
        EpisodeOrchestrator::with_q_table(greedy_config(2), bus.clone(), RecordingHardware::new(), QTable::zeros());
    let summaries = collect_summaries(&mut orchestrator);

    assert_eq!(orchestrator.run().unwrap(), TerminationReason::RunBudgetExhausted);
    bus.clear_observers();

    let rewards: Vec<f64> = summaries.lock().unwrap().iter().map(|s| s.reward).collect();
    assert_eq!(rewards, vec![52.0, -40.0]);
    assert_eq!(resolved.load(Ordering::SeqCst), 2);

    let statuses = statuses.lock().unwrap();
    assert!(statuses.iter().any(|s| s.reset && s.phase == 1));
    // Each episode reset broadcasts a zeroed status.
    assert!(statuses.contains(&StatusUpdate::default()));
}

#[test]
fn test_wait_for_intent_waits_for_orientation_change() {
    let bus = EventBus::connected();
    ScriptedTask::new([Outcome::Success { time_left: 1.0 }]).install(&bus);

    let mut q_table = QTable::zeros();
    q_table.set(State::HOME, Action::WaitForIntent, 1.0);
    let mut orchestrator =
        EpisodeOrchestrator::with_q_table(greedy_config(1), bus.clone(), RecordingHardware::new(), q_table);

    assert_eq!(orchestrator.run().unwrap(), TerminationReason::RunBudgetExhausted);
    bus.clear_observers();
    assert_eq!(orchestrator.state().completed_episodes, 1);
}

#[test]
fn test_shutdown_releases_blocked_reward_wait() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("q.json");

    let bus = EventBus::connected();
    // Drains, but never resolves the handover.
    ScriptedTask::new(Vec::<Outcome>::new()).install(&bus);

    let mut q_table = QTable::zeros();
    q_table.set(State::HOME, Action::InitiateHandover, 1.0);
    for index in 14..=16 {
        q_table.set(State::new(index).unwrap(), Action::ReturnHome, 5.0);
    }

    let mut config = greedy_config(3);
    config.persistence.q_table_path = Some(path.clone());
    let mut orchestrator = EpisodeOrchestrator::with_q_table(config, bus.clone(), RecordingHardware::new(), q_table);

    let shutdown = bus.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        shutdown.request_shutdown();
    });

    let started = Instant::now();
    let reason = orchestrator.run().unwrap();
    handle.join().unwrap();
    bus.clear_observers();

    assert_eq!(reason, TerminationReason::Interrupted);
    assert!(started.elapsed() < Duration::from_secs(2));
    let agent = orchestrator.agent();
    assert_eq!(agent.phase(), AgentPhase::Interrupted);
    // The release step was cancelled: nothing learned from it.
    assert_eq!(agent.trajectory().len(), 3);
    for index in 14..=16 {
        assert_eq!(agent.q_table().get(State::new(index).unwrap(), Action::ReturnHome), 5.0);
    }
    assert_eq!(&QTable::load(&path).unwrap(), agent.q_table());
}

#[test]
fn test_shutdown_after_terminal_step_still_replays_episode() {
    let bus = EventBus::offline();
    let trigger = bus.clone();
    // The first phase 0 broadcast comes from the step that ends episode 1.
    bus.add_observer(move |status: &StatusUpdate| {
        if status.phase == 0 {
            trigger.request_shutdown();
        }
    });

    let mut orchestrator =
        EpisodeOrchestrator::with_q_table(greedy_config(3), bus.clone(), RecordingHardware::new(), QTable::zeros());
    let summaries = collect_summaries(&mut orchestrator);

    assert_eq!(orchestrator.run().unwrap(), TerminationReason::Interrupted);
    bus.clear_observers();

    let summaries = summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].replayed, 4);
    assert_eq!(orchestrator.state().completed_episodes, 1);
    assert_eq!(orchestrator.agent().phase(), AgentPhase::Terminated);
}

#[test]
fn test_hardware_failure_persists_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tables").join("q.json");

    let mut config = greedy_config(3);
    config.persistence.q_table_path = Some(path.clone());
    config.persistence.save_on_exit = false;
    // Fails on the first command of the second episode.
    let mut orchestrator = EpisodeOrchestrator::with_q_table(
        config,
        EventBus::offline(),
        RecordingHardware::failing_after(7),
        QTable::zeros(),
    );

    let err = orchestrator.run().unwrap_err();
    match &err {
        OrchestratorError::Hardware { table_saved, .. } => {
            assert_eq!(table_saved.as_deref(), Some(path.as_path()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.termination_reason(), TerminationReason::HardwareFailure);

    let saved = QTable::load(&path).unwrap();
    assert_eq!(&saved, orchestrator.agent().q_table());
    assert!(!saved.is_zero());
}

#[test]
fn test_persisted_table_reloaded_with_factor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("q.json");

    let mut config = greedy_config(2);
    config.persistence.q_table_path = Some(path.clone());
    let mut first =
        EpisodeOrchestrator::new(config.clone(), EventBus::offline(), RecordingHardware::new()).unwrap();
    first.run().unwrap();
    let learned = first.agent().q_table().clone();

    config.persistence.persistence_factor = Some(0.5);
    let second = EpisodeOrchestrator::new(config, EventBus::offline(), RecordingHardware::new()).unwrap();

    let mut expected = learned;
    expected.scale(0.5);
    assert_eq!(second.agent().q_table(), &expected);
}
