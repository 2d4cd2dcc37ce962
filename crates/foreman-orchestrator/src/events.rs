//! Run event model and trace log.
//!
//! Every loop milestone and backend call is recorded as a [`RunEvent`]. The
//! log is kept in memory for the archive's `exec_log.jsonl` entry and can be
//! mirrored to a broadcast channel for live consumers (progress displays,
//! log sinks).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::config::Role;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The loop started.
    RunStarted {
        run_id: String,
        strategy: String,
        orchestrator: String,
        subagent: String,
        refiner: String,
    },

    /// A new era opened.
    EraStarted { era: usize },

    /// A backend call returned text.
    ModelCall {
        role: Role,
        model_id: String,
        prompt_len: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_tokens: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completion_tokens: Option<u32>,
    },

    /// A backend reported a rate limit; the call will be retried.
    RateLimited { role: Role, attempt: u32, wait_secs: u64 },

    /// A call failed and its result was replaced by placeholder text.
    Degraded { role: Role, reason: String },

    /// The orchestrator asked for a web search.
    SearchQuery { query: String, failed: bool },

    /// The orchestrator declared the objective complete.
    ObjectiveComplete { era: usize, task: usize },

    /// A response hit the output ceiling and a continuation was requested.
    Truncated { role: Role, round: usize },

    /// The continuation ceiling was reached; the partial text is kept.
    ContinuationExhausted { role: Role, rounds: usize },

    /// A best-effort archive was written during continuation.
    Checkpoint { round: usize, archive: String },

    /// An era was consolidated into a new baseline.
    EraRefined { era: usize, output_len: usize },

    /// A structured-output problem found during extraction.
    ExtractionIssue { message: String },

    /// The run produced its deliverable.
    RunFinished { project_name: String, completed: bool, eras: usize },
}

/// A timestamped event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The event.
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Shared, append-only event log for one run.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    entries: Arc<Mutex<Vec<TraceEntry>>>,
    event_tx: Option<broadcast::Sender<TraceEntry>>,
}

impl TraceLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirrors every recorded event to `event_tx`.
    #[must_use]
    pub fn with_sender(mut self, event_tx: broadcast::Sender<TraceEntry>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Records an event.
    pub fn emit(&self, event: RunEvent) {
        let entry = TraceEntry { timestamp: Utc::now(), event };
        if let Some(ref tx) = self.event_tx {
            // No receivers is not an error.
            let _ = tx.send(entry.clone());
        }
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    /// Snapshot of the events recorded so far.
    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded events without timestamps.
    pub fn events(&self) -> Vec<RunEvent> {
        self.entries().into_iter().map(|entry| entry.event).collect()
    }

    /// One JSON object per line.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in self.entries() {
            out.push_str(&serde_json::to_string(&entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}
