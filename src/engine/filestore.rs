use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::RwLock;
use serde_json::Value;

use crate::engine::assets::{content_type_for, AssetInfo, ImageTransformer, TransformOptions, UploadOptions};
use crate::engine::filter::Filter;
use crate::engine::persistence::Persistence;
use crate::engine::schema::SchemaBundle;
use crate::{
    Asset, AssetAccess, CollectionScope, ContentStore, EntryPage, EntryQuery, EntryReader, EntryWriter,
    Error, GlobalAccess, Result, SchemaAccess, ScopedCollection, SortKey, SortOrder,
};

/// File-backed content store.
///
/// Collections and globals come from a [`SchemaBundle`] fixed at construction; the only
/// way to replace it afterwards is [`SchemaAccess::update_schema`], which is what schema
/// sync uses. Files are assumed to have a single writer: this process.
pub struct FileStore {
    persistence: Arc<Persistence>,
    schema: RwLock<Arc<SchemaBundle>>,
    public_url: String,
    transformer: Option<Arc<dyn ImageTransformer>>,
}

impl FileStore {
    pub fn new(persistence: Arc<Persistence>, schema: SchemaBundle, public_url: &str) -> Self {
        Self {
            persistence,
            schema: RwLock::new(Arc::new(schema)),
            public_url: public_url.trim_end_matches('/').to_string(),
            transformer: None,
        }
    }

    /// Opens the store rooted at `dir`, loading `dir/schema.json` when present.
    pub fn open<P: AsRef<Path>>(dir: P, public_url: &str) -> Result<Self> {
        let persistence = Arc::new(Persistence::new(dir)?);
        let schema = SchemaBundle::load(persistence.schema_path())?;
        info!(
            "Opened content store at {:?} with {} collections and {} globals",
            persistence.data_dir(),
            schema.collections.len(),
            schema.globals.len()
        );
        Ok(Self::new(persistence, schema, public_url))
    }

    /// Installs the image transformer used by [`AssetAccess::get_asset`].
    pub fn with_transformer(mut self, transformer: Arc<dyn ImageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Snapshot of the current schema.
    pub fn schema(&self) -> Arc<SchemaBundle> {
        self.schema.read().clone()
    }

    fn require_collection(&self, collection: &str) -> Result<Arc<SchemaBundle>> {
        let schema = self.schema();
        if schema.collection(collection).is_none() {
            return Err(Error::UnknownCollection(collection.to_string()));
        }
        Ok(schema)
    }

    async fn maybe_transform(&self, bytes: Vec<u8>, content_type: String, options: &TransformOptions) -> (Vec<u8>, String) {
        let Some(transformer) = &self.transformer else {
            return (bytes, content_type);
        };
        match transformer.transform(bytes.clone(), options).await {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!("Image transform failed, serving original bytes: {}", e);
                (bytes, content_type)
            }
        }
    }
}

/// Orders entries by the sort keys, comparing the keys' string forms.
fn compare_entries(a: &Value, b: &Value, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = sort_text(a.get(&key.field));
        let right = sort_text(b.get(&key.field));
        let ord = match key.order {
            SortOrder::Asc => left.cmp(&right),
            SortOrder::Desc => right.cmp(&left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn sort_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl EntryReader for FileStore {
    async fn get_entry(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.require_collection(collection)?;
        let path = self.persistence.entry_path(collection, id)?;
        Ok(self.persistence.read_document(&path).await)
    }

    /// Filters, counts, pages, then sorts. Sorting happens after paging, so it only
    /// reorders the returned page.
    async fn get_entries(&self, collection: &str, query: &EntryQuery) -> Result<EntryPage> {
        self.require_collection(collection)?;
        let filter = query.filters.as_ref().map(Filter::parse).transpose()?;

        let mut entries = self.persistence.load_collection(collection).await?;
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            entries.retain(|entry| filter.matches(entry));
        }

        let count = query.include_count.then_some(entries.len());
        let offset = query.offset.unwrap_or(0);
        let mut page: Vec<Value> = entries
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        if !query.sort.is_empty() {
            page.sort_by(|a, b| compare_entries(a, b, &query.sort));
        }

        Ok(EntryPage {
            entries: page,
            limit: query.limit,
            offset,
            count,
        })
    }
}

#[async_trait]
impl EntryWriter for FileStore {
    async fn set_entry(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        let schema = self.schema();
        schema.validate_entry(collection, &data)?;
        let path = self.persistence.entry_path(collection, id)?;
        self.persistence.write_document(&path, &data).await
    }

    async fn delete_entry(&self, collection: &str, id: &str) -> Result<bool> {
        self.require_collection(collection)?;
        let path = self.persistence.entry_path(collection, id)?;
        self.persistence.remove(&path).await
    }
}

#[async_trait]
impl GlobalAccess for FileStore {
    async fn get_global_value(&self, name: &str) -> Result<Option<Value>> {
        if self.schema().global(name).is_none() {
            return Err(Error::UnknownGlobal(name.to_string()));
        }
        let path = self.persistence.global_path(name)?;
        Ok(self.persistence.read_document(&path).await)
    }

    async fn set_global_value(&self, name: &str, value: Value) -> Result<()> {
        let schema = self.schema();
        schema.validate_global(name, &value)?;
        let path = self.persistence.global_path(name)?;
        self.persistence.write_document(&path, &value).await
    }
}

#[async_trait]
impl AssetAccess for FileStore {
    async fn list_assets(&self) -> Result<Vec<AssetInfo>> {
        let assets = self.persistence.list_assets().await?;
        Ok(assets
            .into_iter()
            .map(|(name, size)| AssetInfo {
                content_type: content_type_for(&name),
                name,
                size,
            })
            .collect())
    }

    async fn upload_asset(&self, bytes: Vec<u8>, options: UploadOptions) -> Result<AssetInfo> {
        let name = self.persistence.create_asset(&options.filename, &bytes).await?;
        let content_type = options
            .content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| content_type_for(&name));
        Ok(AssetInfo {
            name,
            size: bytes.len() as u64,
            content_type,
        })
    }

    async fn get_asset(&self, name: &str, transform: Option<&TransformOptions>) -> Result<Option<Asset>> {
        let Some(bytes) = self.persistence.read_asset(name).await? else {
            return Ok(None);
        };
        let content_type = content_type_for(name);
        let (bytes, content_type) = match transform.filter(|t| t.is_requested()) {
            Some(options) => self.maybe_transform(bytes, content_type, options).await,
            None => (bytes, content_type),
        };
        Ok(Some(Asset {
            info: AssetInfo {
                name: name.to_string(),
                size: bytes.len() as u64,
                content_type,
            },
            bytes,
        }))
    }

    async fn delete_asset(&self, name: &str) -> Result<bool> {
        self.persistence.remove_asset(name).await
    }
}

#[async_trait]
impl SchemaAccess for FileStore {
    async fn get_schema(&self) -> Result<SchemaBundle> {
        Ok(self.schema().as_ref().clone())
    }

    async fn update_schema(&self, schema: SchemaBundle) -> Result<()> {
        schema.check()?;
        self.persistence.save_schema(&schema).await?;
        *self.schema.write() = Arc::new(schema);
        Ok(())
    }
}

impl ContentStore for FileStore {
    fn asset_base_url(&self) -> String {
        format!("{}/assets", self.public_url)
    }

    fn collection(&self, name: &str) -> Box<dyn CollectionScope + '_> {
        Box::new(ScopedCollection::new(self, name))
    }
}
