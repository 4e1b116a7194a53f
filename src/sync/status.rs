use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Direction of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Up,
    Down,
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncKind::Up => write!(f, "up"),
            SyncKind::Down => write!(f, "down"),
        }
    }
}

/// How the last run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    pub current: u64,
    pub phase: String,
}

/// Partial update of [`Progress`]; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub total: Option<u64>,
    pub current: Option<u64>,
    pub phase: Option<String>,
}

impl ProgressUpdate {
    pub fn phase(phase: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            ..Self::default()
        }
    }
}

/// The process-wide sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub in_progress: bool,
    #[serde(rename = "type")]
    pub kind: Option<SyncKind>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub sync_logs: Vec<String>,
}

/// Storage for the sync status.
///
/// The sync orchestrator is the only writer. Readers get copies through
/// [`StatusStore::snapshot`].
pub trait StatusStore: Send + Sync {
    /// A consistent copy of the current status, log included.
    fn snapshot(&self) -> SyncStatus;
    /// Replaces the whole status.
    fn set(&self, status: SyncStatus);
    /// Atomically moves from idle to in-progress. Fails with [`Error::Conflict`], leaving
    /// the status untouched, when a run is already in progress.
    fn try_begin(&self, kind: SyncKind) -> Result<()>;
    /// Updates the given progress fields.
    fn update_progress(&self, update: ProgressUpdate);
    /// Adds `n` completed units.
    fn advance(&self, n: u64);
    /// Appends a line to the sync log.
    fn append_log(&self, line: String);
    /// Moves back to idle, recording the outcome.
    fn finish(&self, result: std::result::Result<(), String>);
}

/// In-memory [`StatusStore`] guarded by a mutex.
#[derive(Default)]
pub struct StatusTracker {
    status: Mutex<SyncStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for StatusTracker {
    fn snapshot(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    fn set(&self, status: SyncStatus) {
        *self.status.lock() = status;
    }

    fn try_begin(&self, kind: SyncKind) -> Result<()> {
        let mut status = self.status.lock();
        if status.in_progress {
            let running = status.kind.map(|k| k.to_string()).unwrap_or_default();
            return Err(Error::Conflict(format!("a sync {running} is already in progress")));
        }
        *status = SyncStatus {
            in_progress: true,
            kind: Some(kind),
            started_at: Some(Utc::now()),
            progress: Progress {
                phase: "Starting".to_string(),
                ..Progress::default()
            },
            ..SyncStatus::default()
        };
        Ok(())
    }

    fn update_progress(&self, update: ProgressUpdate) {
        let mut status = self.status.lock();
        if let Some(total) = update.total {
            status.progress.total = total;
        }
        if let Some(current) = update.current {
            status.progress.current = current;
        }
        if let Some(phase) = update.phase {
            status.progress.phase = phase;
        }
    }

    fn advance(&self, n: u64) {
        self.status.lock().progress.current += n;
    }

    fn append_log(&self, line: String) {
        info!("[sync] {}", line);
        self.status.lock().sync_logs.push(line);
    }

    fn finish(&self, result: std::result::Result<(), String>) {
        let mut status = self.status.lock();
        status.in_progress = false;
        status.finished_at = Some(Utc::now());
        match result {
            Ok(()) => {
                status.outcome = Some(SyncOutcome::Completed);
                status.progress.phase = "Completed".to_string();
            }
            Err(message) => {
                status.outcome = Some(SyncOutcome::Failed);
                status.progress.phase = "Failed".to_string();
                status.error = Some(message);
            }
        }
    }
}
