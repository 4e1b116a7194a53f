/// HTTP server for the Folio Store daemon.
///
/// This module provides the [`Router`] which serves the content API and the sync
/// endpoints over HTTP.
pub mod router;

pub use router::{build_router, AppState, Router};
