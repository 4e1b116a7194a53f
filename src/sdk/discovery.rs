use std::path::Path;
use std::sync::Arc;

use crate::config::{non_empty_var, DEFAULT_PORT};
use crate::engine::FileStore;
use crate::sdk::Client;
use crate::{ContentStore, Result};

/// Opens a [`ContentStore`] based on the environment.
///
/// 1. If `FOLIO_STORE_URL` is set, returns a remote [`Client`] for it. When
///    `FOLIO_STAGE` is set too the client targets that stage, and `FOLIO_TOKEN` is sent as
///    the bearer token.
/// 2. Otherwise opens an embedded [`FileStore`] over `content_dir`, with asset URLs under
///    `FOLIO_PUBLIC_URL` (default `http://localhost:7002`).
///
/// # Examples
///
/// ```no_run
/// use folio_store::{sdk, SchemaAccess};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let store = sdk::new("./content").await?;
///     let schema = store.get_schema().await?;
///     println!("{} collections", schema.collections.len());
///     Ok(())
/// }
/// ```
pub async fn new<P: AsRef<Path>>(content_dir: P) -> Result<Arc<dyn ContentStore>> {
    if let Some(url) = non_empty_var("FOLIO_STORE_URL") {
        let token = non_empty_var("FOLIO_TOKEN");
        let client = match non_empty_var("FOLIO_STAGE") {
            Some(stage) => Client::for_stage(&url, &stage, token.as_deref())?,
            None => Client::new(&url, token.as_deref())?,
        };
        log::debug!("Using remote content store at {}", client.base_url());
        return Ok(Arc::new(client));
    }

    let public_url = non_empty_var("FOLIO_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{DEFAULT_PORT}"));
    let store = FileStore::open(content_dir, &public_url)?;
    Ok(Arc::new(store))
}
