use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::FutureExt;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::engine::assets::AssetInfo;
use crate::engine::schema::{CollectionDef, SchemaBundle};
use crate::sync::rewrite::rewrite;
use crate::sync::status::{ProgressUpdate, StatusStore, SyncKind, SyncStatus};
use crate::{ContentStore, EntryQuery, Error, Result, UploadOptions};

/// Body of `POST /sync/up` and `POST /sync/down`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncRequest {
    pub schema: bool,
    pub entries: bool,
    pub globals: bool,
    pub assets: bool,
    pub stage: Option<String>,
    pub token: Option<String>,
}

impl SyncRequest {
    /// A request selecting every phase.
    pub fn all(stage: &str, token: &str) -> Self {
        Self {
            schema: true,
            entries: true,
            globals: true,
            assets: true,
            stage: Some(stage.to_string()),
            token: Some(token.to_string()),
        }
    }

    fn validate(&self) -> Result<(&str, &str)> {
        let stage = non_blank(&self.stage).ok_or_else(|| Error::InvalidRequest("must specify a stage".to_string()))?;
        let token = non_blank(&self.token).ok_or_else(|| Error::InvalidRequest("must specify a token".to_string()))?;
        if !(self.schema || self.entries || self.globals || self.assets) {
            return Err(Error::InvalidRequest(
                "must select at least one of schema, entries, globals or assets".to_string(),
            ));
        }
        Ok((stage, token))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Opens the remote store of a stage.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, stage: &str, token: &str) -> Result<Arc<dyn ContentStore>>;
}

/// What a run will transfer, read from the source store before anything is written.
struct Plan {
    schema: SchemaBundle,
    assets: Vec<AssetInfo>,
    total: u64,
}

/// Runs one-directional syncs between the local store and a remote stage.
///
/// Only one run may be in progress at a time; the guard lives in the [`StatusStore`].
/// A run either completes or fails as a whole. Work already written to the
/// destination stays there when a later step fails.
///
/// An accepted run executes on its own task and always reaches a terminal status, even
/// when the caller awaiting it is dropped.
#[derive(Clone)]
pub struct Syncer {
    local: Arc<dyn ContentStore>,
    connector: Arc<dyn RemoteConnector>,
    status: Arc<dyn StatusStore>,
    config: SyncConfig,
}

impl Syncer {
    pub fn new(local: Arc<dyn ContentStore>, connector: Arc<dyn RemoteConnector>, status: Arc<dyn StatusStore>) -> Self {
        Self {
            local,
            connector,
            status,
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    /// Pushes local content to the remote stage.
    pub async fn sync_up(&self, request: &SyncRequest) -> Result<SyncStatus> {
        self.sync(SyncKind::Up, request).await
    }

    /// Pulls the remote stage's content into the local store.
    pub async fn sync_down(&self, request: &SyncRequest) -> Result<SyncStatus> {
        self.sync(SyncKind::Down, request).await
    }

    async fn sync(&self, kind: SyncKind, request: &SyncRequest) -> Result<SyncStatus> {
        let (stage, token) = request.validate()?;
        let (stage, token) = (stage.to_string(), token.to_string());
        self.status.try_begin(kind)?;
        self.status.append_log(format!("Sync {kind} with stage {stage} started"));

        let run = self.clone();
        let request = request.clone();
        let handle = tokio::spawn(async move { run.run(kind, &request, &stage, &token).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(self.fail(kind, Error::Internal(format!("sync task aborted: {e}")))),
        }
    }

    async fn run(&self, kind: SyncKind, request: &SyncRequest, stage: &str, token: &str) -> Result<SyncStatus> {
        let outcome = AssertUnwindSafe(self.transfer(kind, request, stage, token))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Internal("sync run panicked".to_string())));

        match outcome {
            Ok(()) => {
                self.status.append_log(format!("Sync {kind} completed"));
                self.status.finish(Ok(()));
                Ok(self.status.snapshot())
            }
            Err(e) => Err(self.fail(kind, e)),
        }
    }

    /// Records `e` as the terminal failure of the current run.
    fn fail(&self, kind: SyncKind, e: Error) -> Error {
        let message = e.to_string();
        error!("Sync {} failed: {}", kind, message);
        self.status.append_log(format!("Sync {kind} failed: {message}"));
        self.status.finish(Err(message.clone()));
        Error::Sync(message)
    }

    async fn transfer(&self, kind: SyncKind, request: &SyncRequest, stage: &str, token: &str) -> Result<()> {
        let remote = self.connector.connect(stage, token).await?;
        let (source, dest): (&dyn ContentStore, &dyn ContentStore) = match kind {
            SyncKind::Up => (self.local.as_ref(), remote.as_ref()),
            SyncKind::Down => (remote.as_ref(), self.local.as_ref()),
        };
        let from = source.asset_base_url();
        let to = dest.asset_base_url();

        let plan = self.plan(source, request).await?;
        self.status.update_progress(ProgressUpdate {
            total: Some(plan.total),
            current: Some(0),
            phase: Some("Counting".to_string()),
        });
        self.status.append_log(format!("{} units to transfer", plan.total));

        if request.assets {
            self.sync_assets(source, dest, &plan.assets).await?;
        }
        if request.schema {
            self.status.update_progress(ProgressUpdate::phase("Syncing schema"));
            dest.update_schema(plan.schema.clone()).await?;
            self.status.advance(1);
            self.status.append_log(format!(
                "Synced schema with {} collections and {} globals",
                plan.schema.collections.len(),
                plan.schema.globals.len()
            ));
        }
        if request.entries {
            for def in &plan.schema.collections {
                self.sync_collection(source, dest, &plan.schema, def, &from, &to).await?;
            }
        }
        if request.globals {
            self.status.update_progress(ProgressUpdate::phase("Syncing globals"));
            for def in &plan.schema.globals {
                match source.get_global_value(&def.name).await? {
                    Some(value) => {
                        let value = rewrite(&value, &def.schema, &plan.schema, &from, &to);
                        dest.set_global_value(&def.name, value).await?;
                        self.status.append_log(format!("Synced global {}", def.name));
                    }
                    None => self.status.append_log(format!("Global {} has no value, skipped", def.name)),
                }
                self.status.advance(1);
            }
        }
        Ok(())
    }

    async fn plan(&self, source: &dyn ContentStore, request: &SyncRequest) -> Result<Plan> {
        let schema = source.get_schema().await?;
        let assets = if request.assets {
            source.list_assets().await?
        } else {
            Vec::new()
        };

        let mut total = assets.len() as u64;
        if request.schema {
            total += 1;
        }
        if request.entries {
            for def in &schema.collections {
                let page = source.get_entries(&def.name, &EntryQuery::count_only()).await?;
                total += page.count.unwrap_or(0) as u64;
            }
        }
        if request.globals {
            total += schema.globals.len() as u64;
        }
        Ok(Plan { schema, assets, total })
    }

    /// Copies assets the destination lacks, or holds with a different size. A stale copy
    /// is deleted first so the upload keeps its filename.
    async fn sync_assets(&self, source: &dyn ContentStore, dest: &dyn ContentStore, assets: &[AssetInfo]) -> Result<()> {
        self.status.update_progress(ProgressUpdate::phase("Syncing assets"));
        self.status.append_log(format!("Syncing {} assets", assets.len()));

        let existing: HashMap<String, u64> = dest
            .list_assets()
            .await?
            .into_iter()
            .map(|a| (a.name, a.size))
            .collect();

        for asset in assets {
            if existing.get(&asset.name) == Some(&asset.size) {
                self.status.advance(1);
                continue;
            }
            let Some(content) = source.get_asset(&asset.name, None).await? else {
                self.status.append_log(format!("Asset {} disappeared from the source, skipped", asset.name));
                self.status.advance(1);
                continue;
            };
            if existing.contains_key(&asset.name) {
                dest.delete_asset(&asset.name).await?;
            }
            let options = UploadOptions {
                filename: asset.name.clone(),
                content_type: Some(content.info.content_type),
            };
            let stored = dest.upload_asset(content.bytes, options).await?;
            if stored.name == asset.name {
                self.status.append_log(format!("Copied asset {}", asset.name));
            } else {
                self.status
                    .append_log(format!("Copied asset {} but it was stored as {}", asset.name, stored.name));
            }
            self.status.advance(1);
        }
        Ok(())
    }

    /// Pages through the source collection and writes each page in concurrent batches.
    async fn sync_collection(
        &self,
        source: &dyn ContentStore,
        dest: &dyn ContentStore,
        bundle: &SchemaBundle,
        def: &CollectionDef,
        from: &str,
        to: &str,
    ) -> Result<()> {
        self.status
            .update_progress(ProgressUpdate::phase(format!("Syncing entries of {}", def.name)));

        let page_size = self.config.page_size.max(1);
        let batch_size = self.config.entry_batch_size.max(1);
        let mut offset = 0;
        loop {
            let query = EntryQuery::page(page_size, offset);
            let target = format!("page {} of {}", offset / page_size + 1, def.name);
            let page = self
                .config
                .retry
                .run(
                    || source.get_entries(&def.name, &query),
                    |attempt, delay, e| self.log_retry(&target, attempt, delay, e),
                )
                .await?;

            let fetched = page.entries.len();
            for batch in page.entries.chunks(batch_size) {
                try_join_all(batch.iter().map(|entry| self.sync_entry(dest, bundle, def, entry, from, to))).await?;
            }
            offset += fetched;
            if fetched < page_size {
                break;
            }
        }
        self.status.append_log(format!("Synced {} entries of {}", offset, def.name));
        Ok(())
    }

    async fn sync_entry(
        &self,
        dest: &dyn ContentStore,
        bundle: &SchemaBundle,
        def: &CollectionDef,
        entry: &Value,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let Some(id) = def.entry_id(entry) else {
            self.status
                .append_log(format!("Entry of {} without {} skipped", def.name, def.id_field));
            self.status.advance(1);
            return Ok(());
        };
        let data = rewrite(entry, &def.schema, bundle, from, to);
        let target = format!("{}/{}", def.name, id);
        self.config
            .retry
            .run(
                || dest.set_entry(&def.name, &id, data.clone()),
                |attempt, delay, e| self.log_retry(&target, attempt, delay, e),
            )
            .await?;
        self.status.advance(1);
        Ok(())
    }

    fn log_retry(&self, target: &str, attempt: u32, delay: Duration, e: &Error) {
        self.status.append_log(format!(
            "Retrying {} in {}ms (attempt {}/{}): {}",
            target,
            delay.as_millis(),
            attempt,
            self.config.retry.max_attempts,
            e
        ));
    }
}
