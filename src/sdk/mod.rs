/// Software Development Kit (SDK) for Folio Store.
///
/// This module provides a remote HTTP client implementing [`ContentStore`](crate::ContentStore)
/// and automatic selection between that client and an embedded file store.
pub mod client;
/// Automatic mode discovery and store initialization.
pub mod discovery;

pub use client::{Client, HttpConnector};
pub use discovery::new;
