//! Folio Store is a headless content store.
//!
//! Content is organised as typed **collections** of entries and singleton **globals**,
//! persisted as JSON documents on disk, plus a flat pool of binary **assets**. A
//! MongoDB-style filter language selects entries, and a one-directional sync engine moves
//! schema, entries, globals and assets between the local store and a remote stage.
//!
//! ## Core Components
//! - [`engine`]: The file-backed store, the filter engine and the structural schema.
//! - [`sync`]: Sync orchestration, status tracking, retries and asset URL rewriting.
//! - [`sdk`]: Remote HTTP client and store discovery.
//! - [`server`]: HTTP API exposing a store and the sync endpoints.

pub mod config;
pub mod engine;
pub mod sdk;
pub mod server;
pub mod sync;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use engine::assets::{AssetInfo, TransformOptions, UploadOptions};
pub use engine::schema::{CollectionDef, FieldSchema, GlobalDef, SchemaBundle};

/// Errors returned by Folio Store.
#[derive(Error, Debug)]
pub enum Error {
    /// A write was rejected because the data does not conform to its schema.
    #[error("validation failed for {target}: {}", .details.join("; "))]
    Validation { target: String, details: Vec<String> },
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The collection is not declared in the schema.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    /// The global is not declared in the schema.
    #[error("unknown global: {0}")]
    UnknownGlobal(String),
    /// An entry id, global name or asset filename is not a single path component.
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),
    /// A filter expression could not be parsed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// A request is missing required parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A sync is already running.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The remote content service answered with a failure.
    #[error("remote error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Remote { status: Option<u16>, message: String },
    /// A sync run was aborted.
    #[error("sync failed: {0}")]
    Sync(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Error from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns true for failures worth retrying: I/O hiccups, connection problems,
    /// timeouts, rate limiting and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Remote { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            _ => false,
        }
    }
}

/// A specialized Result type for Folio Store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Sort direction for one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One key of an entry listing sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// Options for listing the entries of a collection.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Raw filter expression, parsed by [`engine::filter::Filter::parse`].
    pub filters: Option<Value>,
    pub sort: Vec<SortKey>,
    pub include_count: bool,
}

impl EntryQuery {
    /// Query that only asks for the filtered total.
    pub fn count_only() -> Self {
        Self {
            limit: Some(0),
            include_count: true,
            ..Self::default()
        }
    }

    /// Query for a single page.
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
            ..Self::default()
        }
    }
}

/// A page of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPage {
    pub entries: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    /// Total matches before paging, present when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// An asset's bytes and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub info: AssetInfo,
    pub bytes: Vec<u8>,
}

/// Read access to collection entries.
#[async_trait]
pub trait EntryReader: Send + Sync {
    /// Returns the entry, or `None` when it is missing or unreadable.
    async fn get_entry(&self, collection: &str, id: &str) -> Result<Option<Value>>;
    /// Lists entries with filtering, paging and sorting.
    async fn get_entries(&self, collection: &str, query: &EntryQuery) -> Result<EntryPage>;
}

/// Write access to collection entries.
#[async_trait]
pub trait EntryWriter: Send + Sync {
    /// Validates and stores an entry, replacing any previous version.
    async fn set_entry(&self, collection: &str, id: &str, data: Value) -> Result<()>;
    /// Removes an entry. Returns `false` when there was nothing to remove.
    async fn delete_entry(&self, collection: &str, id: &str) -> Result<bool>;
}

/// Access to global values.
#[async_trait]
pub trait GlobalAccess: Send + Sync {
    /// Returns the global's value, or `None` when it was never set.
    async fn get_global_value(&self, name: &str) -> Result<Option<Value>>;
    /// Validates and stores the global's value.
    async fn set_global_value(&self, name: &str, value: Value) -> Result<()>;
}

/// Access to binary assets.
#[async_trait]
pub trait AssetAccess: Send + Sync {
    /// Lists every stored asset.
    async fn list_assets(&self) -> Result<Vec<AssetInfo>>;
    /// Stores bytes under the requested filename, or a free variant of it.
    async fn upload_asset(&self, bytes: Vec<u8>, options: UploadOptions) -> Result<AssetInfo>;
    /// Reads an asset, optionally transformed.
    async fn get_asset(&self, name: &str, transform: Option<&TransformOptions>) -> Result<Option<Asset>>;
    /// Removes an asset. Returns `false` when there was nothing to remove.
    async fn delete_asset(&self, name: &str) -> Result<bool>;
}

/// Access to the declared content model.
#[async_trait]
pub trait SchemaAccess: Send + Sync {
    /// Returns every collection and global definition.
    async fn get_schema(&self) -> Result<SchemaBundle>;
    /// Replaces every collection and global definition.
    async fn update_schema(&self, schema: SchemaBundle) -> Result<()>;
}

/// The primary interface for interacting with a content store, local or remote.
pub trait ContentStore: EntryReader + EntryWriter + GlobalAccess + AssetAccess + SchemaAccess {
    /// URL prefix under which this store serves its assets.
    fn asset_base_url(&self) -> String;
    /// Returns a [`CollectionScope`] pinned to one collection.
    fn collection(&self, name: &str) -> Box<dyn CollectionScope + '_>;
}

/// A simplified, scoped interface for one collection.
#[async_trait]
pub trait CollectionScope: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Value>>;
    async fn set(&self, id: &str, data: Value) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self, query: &EntryQuery) -> Result<EntryPage>;
}

/// [`CollectionScope`] over any [`ContentStore`].
pub struct ScopedCollection<'a, S: ?Sized> {
    store: &'a S,
    name: String,
}

impl<'a, S: ?Sized> ScopedCollection<'a, S> {
    pub fn new(store: &'a S, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl<'a, S: ContentStore + ?Sized> CollectionScope for ScopedCollection<'a, S> {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        self.store.get_entry(&self.name, id).await
    }

    async fn set(&self, id: &str, data: Value) -> Result<()> {
        self.store.set_entry(&self.name, id, data).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete_entry(&self.name, id).await
    }

    async fn list(&self, query: &EntryQuery) -> Result<EntryPage> {
        self.store.get_entries(&self.name, query).await
    }
}
