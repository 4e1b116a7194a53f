//! Process configuration.
//!
//! Values come from CLI flags first, then `FOLIO_*` environment variables, then defaults.

use std::env;
use std::path::PathBuf;

use crate::sync::retry::RetryPolicy;

pub const DEFAULT_CONTENT_DIR: &str = "content";
pub const DEFAULT_PORT: u16 = 7002;

/// Settings of the `folio-stored` daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Root of the on-disk content layout; `schema.json` lives here.
    pub content_dir: PathBuf,
    pub port: u16,
    /// Public URL prefix of this server, used to build asset URLs.
    pub public_url: String,
    /// Root URL of the remote content service that sync talks to.
    pub remote_url: Option<String>,
}

impl ServerConfig {
    pub fn new(content_dir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            content_dir: content_dir.into(),
            port,
            public_url: format!("http://localhost:{port}"),
            remote_url: None,
        }
    }

    /// Reads `FOLIO_CONTENT_DIR`, `FOLIO_PORT`, `FOLIO_PUBLIC_URL` and `FOLIO_REMOTE_URL`.
    pub fn from_env() -> Self {
        Self::resolve(None, None, None, None)
    }

    /// Takes each setting from the given flag, then its environment variable, then the
    /// default. The default public URL follows the resolved port.
    pub fn resolve(
        content_dir: Option<PathBuf>,
        port: Option<u16>,
        public_url: Option<String>,
        remote_url: Option<String>,
    ) -> Self {
        let content_dir = content_dir
            .or_else(|| non_empty_var("FOLIO_CONTENT_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_DIR));
        let port = port.unwrap_or_else(|| match non_empty_var("FOLIO_PORT").map(|p| p.parse::<u16>()) {
            Some(Ok(port)) => port,
            Some(Err(e)) => {
                log::warn!("Ignoring invalid FOLIO_PORT: {}", e);
                DEFAULT_PORT
            }
            None => DEFAULT_PORT,
        });
        let mut config = Self::new(content_dir, port);
        if let Some(url) = public_url.or_else(|| non_empty_var("FOLIO_PUBLIC_URL")) {
            config.public_url = url.trim_end_matches('/').to_string();
        }
        config.remote_url = remote_url.or_else(|| non_empty_var("FOLIO_REMOTE_URL"));
        config
    }

    pub fn schema_path(&self) -> PathBuf {
        self.content_dir.join("schema.json")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT_DIR, DEFAULT_PORT)
    }
}

/// Tuning of sync runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Entries written concurrently per batch.
    pub entry_batch_size: usize,
    /// Entries fetched per page from the source store.
    pub page_size: usize,
    /// Backoff applied to every entry write and page fetch.
    pub retry: RetryPolicy,
}

impl SyncConfig {
    pub fn with_entry_batch_size(mut self, size: usize) -> Self {
        self.entry_batch_size = size.max(1);
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            entry_batch_size: 10,
            page_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

pub(crate) fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
