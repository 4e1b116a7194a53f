use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use folio_store::config::ServerConfig;
use folio_store::engine::FileStore;
use folio_store::sdk::{self, HttpConnector};
use folio_store::sync::{StatusTracker, SyncRequest, Syncer};
use folio_store::{
    AssetAccess, ContentStore, EntryQuery, EntryReader, EntryWriter, GlobalAccess, SchemaAccess, SortKey,
    UploadOptions,
};
use serde_json::Value;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "content")]
    content_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    Get { collection: String, id: String },
    Set { collection: String, id: String, value: String },
    Del { collection: String, id: String },
    List {
        collection: String,
        /// Filter expression as JSON
        #[arg(long)]
        filter: Option<String>,
        /// Sort keys as JSON, e.g. '[{"field":"title","order":"desc"}]'
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long)]
        count: bool,
    },
    GlobalGet { name: String },
    GlobalSet { name: String, value: String },
    Assets,
    Upload {
        path: PathBuf,
        /// Stored filename, defaults to the file's name
        #[arg(long)]
        name: Option<String>,
    },
    DelAsset { name: String },
    Schema,
    Sync {
        direction: Direction,
        #[arg(long)]
        schema: bool,
        #[arg(long)]
        entries: bool,
        #[arg(long)]
        globals: bool,
        #[arg(long)]
        assets: bool,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long)]
        token: Option<String>,
        /// Remote content service [env: FOLIO_REMOTE_URL]
        #[arg(long)]
        remote: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

async fn sync(content_dir: PathBuf, direction: Direction, request: SyncRequest, remote: Option<String>) -> anyhow::Result<()> {
    let config = ServerConfig::resolve(Some(content_dir), None, None, remote);
    let local = Arc::new(FileStore::open(&config.content_dir, &config.public_url)?);
    let syncer = Syncer::new(
        local,
        Arc::new(HttpConnector::new(config.remote_url)),
        Arc::new(StatusTracker::new()),
    );
    let result = match direction {
        Direction::Up => syncer.sync_up(&request).await,
        Direction::Down => syncer.sync_down(&request).await,
    };
    for line in &syncer.status().sync_logs {
        println!("{}", line);
    }
    result?;
    Ok(())
}

async fn run(store: &dyn ContentStore, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Get { collection, id } => {
            let entry = store.get_entry(&collection, &id).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Set { collection, id, value } => {
            store.set_entry(&collection, &id, parse_value(value)).await?;
            println!("OK");
        }
        Commands::Del { collection, id } => {
            let deleted = store.delete_entry(&collection, &id).await?;
            println!("{}", if deleted { "OK" } else { "NOT FOUND" });
        }
        Commands::List {
            collection,
            filter,
            sort,
            limit,
            offset,
            count,
        } => {
            let sort: Vec<SortKey> = match sort {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Vec::new(),
            };
            let query = EntryQuery {
                limit,
                offset,
                filters: filter.map(|raw| serde_json::from_str(&raw)).transpose()?,
                sort,
                include_count: count,
            };
            let page = store.get_entries(&collection, &query).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Commands::GlobalGet { name } => {
            let value = store.get_global_value(&name).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::GlobalSet { name, value } => {
            store.set_global_value(&name, parse_value(value)).await?;
            println!("OK");
        }
        Commands::Assets => {
            let list = store.list_assets().await?;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Commands::Upload { path, name } => {
            let filename = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("cannot derive a filename from {:?}", path))?,
            };
            let bytes = tokio::fs::read(&path).await?;
            let info = store.upload_asset(bytes, UploadOptions::new(&filename)).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::DelAsset { name } => {
            let deleted = store.delete_asset(&name).await?;
            println!("{}", if deleted { "OK" } else { "NOT FOUND" });
        }
        Commands::Schema => {
            let schema = store.get_schema().await?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Sync { .. } => anyhow::bail!("sync is not a store command"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            direction,
            schema,
            entries,
            globals,
            assets,
            stage,
            token,
            remote,
        } => {
            let request = SyncRequest {
                schema,
                entries,
                globals,
                assets,
                stage,
                token,
            };
            sync(cli.content_dir, direction, request, remote).await
        }
        command => {
            let store = sdk::new(&cli.content_dir).await?;
            run(store.as_ref(), command).await
        }
    }
}
