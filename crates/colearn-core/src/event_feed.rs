//! Inbound event feed for runs without a live transport.
//!
//! A feed is a JSONL file of inbound events, one per line:
//!
//! ```text
//! {"topic":"hand_pose","x":0.4,"y":0.1,"z":0.9,"orientation":"Serve","delay_ms":500}
//! {"topic":"human_input","active":true}
//! {"topic":"task_status","handover_successful":1,"time_left":3.0,"draining_starts":1.0}
//! ```
//!
//! `delay_ms` is the pause before the event is delivered. Events are replayed
//! into the [`EventBus`] from a dedicated delivery thread.

use colearn_proto::{EventBus, InboundEvent};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One line of a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedLine {
    /// Pause before delivery.
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(flatten)]
    pub event: InboundEvent,
}

/// Information about a malformed JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MalformedLine {
    /// Line number in the file (1-indexed).
    pub line_number: u64,
    /// The raw content that failed to parse (truncated if very long).
    pub content: String,
    pub error: String,
}

impl MalformedLine {
    const MAX_CONTENT_LEN: usize = 100;

    pub fn new(line_number: u64, content: &str, error: String) -> Self {
        let content = match content.char_indices().nth(Self::MAX_CONTENT_LEN) {
            Some((end, _)) => format!("{}...", &content[..end]),
            None => content.to_string(),
        };
        Self {
            line_number,
            content,
            error,
        }
    }
}

/// Result of parsing a feed.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub lines: Vec<FeedLine>,
    pub malformed: Vec<MalformedLine>,
}

/// Parses a feed. Blank lines are skipped; malformed lines are collected.
pub fn parse_feed<R: BufRead>(reader: R) -> io::Result<ParseResult> {
    let mut result = ParseResult::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = index as u64 + 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<FeedLine>(&line) {
            Ok(feed_line) => result.lines.push(feed_line),
            Err(e) => {
                warn!(error = %e, line_number, "Malformed feed line");
                result.malformed.push(MalformedLine::new(line_number, &line, e.to_string()));
            }
        }
    }
    Ok(result)
}

/// Reads the feed at `path`.
pub fn read_feed(path: impl AsRef<Path>) -> io::Result<ParseResult> {
    let file = File::open(path.as_ref())?;
    parse_feed(BufReader::new(file))
}

/// Delivers `lines` into `bus` from a new thread.
///
/// The thread stops early once a shutdown is requested and returns the
/// number of events delivered.
pub fn spawn_feed(bus: EventBus, lines: Vec<FeedLine>) -> io::Result<JoinHandle<usize>> {
    thread::Builder::new()
        .name("colearn-feed".to_string())
        .spawn(move || {
            let mut delivered = 0;
            for line in lines {
                if line.delay_ms > 0 {
                    thread::sleep(Duration::from_millis(line.delay_ms));
                }
                if bus.is_shutdown_requested() {
                    debug!(delivered, "Shutdown requested, stopping event feed");
                    break;
                }
                bus.deliver(line.event);
                delivered += 1;
            }
            info!(delivered, "Event feed finished");
            delivered
        })
}
