//! Episode recorder for writing run activity to JSONL files.
//!
//! `EpisodeRecorder` captures every outbound [`StatusUpdate`] published on the
//! bus and one summary per finished episode, so a run can be analysed after
//! the fact.

use crate::orchestrator::{EpisodeSummary, TerminationReason};
use colearn_proto::StatusUpdate;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// A timestamped record in the JSONL recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unix timestamp in milliseconds when the event was recorded.
    pub ts: u64,

    /// The event type discriminator (e.g., "bus.status", "episode.summary").
    pub event: String,

    pub data: serde_json::Value,
}

impl Record {
    /// Creates a new record with the current timestamp.
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            ts,
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn from_status(status: &StatusUpdate) -> Self {
        Self::new("bus.status", status)
    }

    pub fn from_summary(summary: &EpisodeSummary) -> Self {
        Self::new("episode.summary", summary)
    }

    /// Creates a metadata record for the end of a run.
    pub fn meta_termination(reason: TerminationReason, episodes: u32, elapsed_secs: f64) -> Self {
        Self::new(
            "_meta.termination",
            serde_json::json!({
                "reason": reason.as_str(),
                "episodes": episodes,
                "elapsed_secs": elapsed_secs,
            }),
        )
    }
}

/// Records run activity to a JSONL output.
///
/// The recorder is thread-safe and can be used as a bus observer. Each record
/// is written as one line as soon as it arrives.
pub struct EpisodeRecorder<W> {
    writer: Mutex<W>,
}

impl<W: Write> EpisodeRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn record_status(&self, status: &StatusUpdate) {
        self.write_record(&Record::from_status(status));
    }

    pub fn record_summary(&self, summary: &EpisodeSummary) {
        self.write_record(&Record::from_summary(summary));
    }

    pub fn record_meta(&self, record: Record) {
        self.write_record(&record);
    }

    fn write_record(&self, record: &Record) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        // Recording never interrupts the run.
        if let Ok(json) = serde_json::to_string(record) {
            let _ = writeln!(writer, "{json}");
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

impl<W: Write + Send + 'static> EpisodeRecorder<W> {
    /// Creates an observer closure suitable for `EventBus::add_observer`.
    pub fn make_observer(recorder: Arc<Self>) -> impl Fn(&StatusUpdate) + Send + Sync + 'static {
        move |status| recorder.record_status(status)
    }

    /// Creates an observer closure suitable for
    /// `EpisodeOrchestrator::on_episode_end`.
    pub fn make_summary_observer(recorder: Arc<Self>) -> impl Fn(&EpisodeSummary) + Send + 'static {
        move |summary| recorder.record_summary(summary)
    }
}
