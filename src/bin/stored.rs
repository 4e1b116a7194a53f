use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use folio_store::config::ServerConfig;
use folio_store::engine::FileStore;
use folio_store::sdk::HttpConnector;
use folio_store::server::{AppState, Router};
use folio_store::sync::{StatusTracker, Syncer};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Content directory [env: FOLIO_CONTENT_DIR, default: content]
    #[arg(short, long)]
    content_dir: Option<PathBuf>,

    /// Listen port [env: FOLIO_PORT, default: 7002]
    #[arg(short, long)]
    port: Option<u16>,

    /// Public URL prefix of this server [env: FOLIO_PUBLIC_URL]
    #[arg(long)]
    public_url: Option<String>,

    /// Root URL of the remote content service [env: FOLIO_REMOTE_URL]
    #[arg(long)]
    remote_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = ServerConfig::resolve(args.content_dir, args.port, args.public_url, args.remote_url);

    let store = Arc::new(FileStore::open(&config.content_dir, &config.public_url)?);
    if config.remote_url.is_none() {
        log::warn!("FOLIO_REMOTE_URL is not set, sync requests will fail");
    }
    let syncer = Syncer::new(
        store.clone(),
        Arc::new(HttpConnector::new(config.remote_url.clone())),
        Arc::new(StatusTracker::new()),
    );

    let router = Router::new(AppState::new(store.clone(), Arc::new(syncer)));
    let schema = store.schema();

    println!("Starting Folio Store Daemon...");
    println!(
        "Serving {:?} with {} collections and {} globals.",
        config.content_dir,
        schema.collections.len(),
        schema.globals.len()
    );
    println!("Folio Store listening on :{} (HTTP)", config.port);

    tokio::select! {
        res = router.listen(config.port) => {
            if let Err(e) = res {
                eprintln!("HTTP server failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            println!("\nShutdown signal received. Exiting.");
        }
    }

    Ok(())
}
