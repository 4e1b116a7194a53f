use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::engine::assets::candidate_name;
use crate::engine::schema::SchemaBundle;
use crate::{Error, Result};

const GLOBALS_DIR: &str = "globals";
const ASSETS_DIR: &str = "assets";
const SCHEMA_FILE: &str = "schema.json";

/// Names a collection cannot take, since its directory would clash with these entries.
pub const RESERVED_NAMES: &[&str] = &[GLOBALS_DIR, ASSETS_DIR, SCHEMA_FILE];

/// On-disk envelope of an entry or global value.
#[derive(Serialize, Deserialize)]
struct Document {
    data: Value,
}

/// Handles disk I/O for the [`FileStore`](crate::engine::FileStore).
///
/// Layout under the content directory:
/// - `<collection>/<id>.json` holds `{ "data": entry }`
/// - `globals/<name>.json` holds `{ "data": value }`
/// - `assets/<filename>` holds raw bytes
/// - `schema.json` holds the declared [`SchemaBundle`]
///
/// Documents are written with a "write-then-rename" strategy so a reader never sees a
/// half-written file.
pub struct Persistence {
    data_dir: PathBuf,
}

impl Persistence {
    /// Initializes a new `Persistence` handler in the specified directory.
    ///
    /// If the directory does not exist, it will be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Self { data_dir: dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn schema_path(&self) -> PathBuf {
        self.data_dir.join(SCHEMA_FILE)
    }

    pub fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        check_component(collection)?;
        Ok(self.data_dir.join(collection))
    }

    pub fn entry_path(&self, collection: &str, id: &str) -> Result<PathBuf> {
        check_component(id)?;
        Ok(self.collection_dir(collection)?.join(format!("{id}.json")))
    }

    pub fn global_path(&self, name: &str) -> Result<PathBuf> {
        check_component(name)?;
        Ok(self.data_dir.join(GLOBALS_DIR).join(format!("{name}.json")))
    }

    fn asset_path(&self, filename: &str) -> Result<PathBuf> {
        check_component(filename)?;
        Ok(self.data_dir.join(ASSETS_DIR).join(filename))
    }

    /// Writes `{ "data": data }` to `path` atomically.
    pub async fn write_document(&self, path: &Path, data: &Value) -> Result<()> {
        let document = Document { data: data.clone() };
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomic(path, &bytes).await
    }

    /// Reads the `data` of a document. Any failure reads as `None`.
    pub async fn read_document(&self, path: &Path) -> Option<Value> {
        let content = match fs::read(path).await {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Could not read document {:?}: {}", path, e);
                }
                return None;
            }
        };
        match serde_json::from_slice::<Document>(&content) {
            Ok(document) => Some(document.data),
            Err(e) => {
                warn!("Could not unmarshal document {:?}: {}", path, e);
                None
            }
        }
    }

    /// Loads every readable entry of a collection, in filename order.
    pub async fn load_collection(&self, collection: &str) -> Result<Vec<Value>> {
        let dir = self.collection_dir(collection)?;
        let mut paths = Vec::new();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(data) = self.read_document(&path).await {
                entries.push(data);
            }
        }
        Ok(entries)
    }

    /// Removes a file. Returns `false` when it did not exist.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the schema bundle to `schema.json`.
    pub async fn save_schema(&self, schema: &SchemaBundle) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(schema)?;
        write_atomic(&self.schema_path(), &bytes).await
    }

    /// Stores asset bytes under `filename` or the first free `-N` variant of it and
    /// returns the name used.
    ///
    /// The name is claimed with create-new semantics, so two concurrent uploads of the
    /// same filename never end up sharing a file.
    pub async fn create_asset(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        check_component(filename)?;
        fs::create_dir_all(self.data_dir.join(ASSETS_DIR)).await?;

        let mut attempt = 0u32;
        loop {
            let name = candidate_name(filename, attempt);
            let path = self.asset_path(&name)?;
            match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    if let Err(e) = write_all_and_flush(&mut file, bytes).await {
                        let _ = fs::remove_file(&path).await;
                        return Err(e);
                    }
                    if attempt > 0 {
                        debug!("Asset {} already existed, stored as {}", filename, name);
                    }
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads an asset's bytes, `None` when missing.
    pub async fn read_asset(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.asset_path(filename)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists `(filename, size)` of every asset, sorted by filename.
    pub async fn list_assets(&self) -> Result<Vec<(String, u64)>> {
        let dir = self.data_dir.join(ASSETS_DIR);
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut assets = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                assets.push((name.to_string(), metadata.len()));
            }
        }
        assets.sort();
        Ok(assets)
    }

    pub async fn remove_asset(&self, filename: &str) -> Result<bool> {
        let path = self.asset_path(filename)?;
        self.remove(&path).await
    }
}

/// Rejects anything that is not a single, plain path component.
pub fn check_component(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.ends_with(".tmp");
    if invalid {
        return Err(Error::InvalidId(name.to_string()));
    }
    Ok(())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, bytes).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn write_all_and_flush(file: &mut fs::File, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}
