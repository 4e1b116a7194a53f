/// Sync runs between the local store and a remote stage.
pub mod orchestrator;
/// Backoff for remote writes.
pub mod retry;
/// Schema-guided asset URL rewriting.
pub mod rewrite;
/// The process-wide sync status.
pub mod status;

pub use orchestrator::{RemoteConnector, SyncRequest, Syncer};
pub use retry::RetryPolicy;
pub use status::{StatusStore, StatusTracker, SyncKind, SyncOutcome, SyncStatus};
