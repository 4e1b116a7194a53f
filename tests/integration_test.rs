use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use folio_store::engine::{FileStore, Persistence};
use folio_store::sdk::{Client, HttpConnector};
use folio_store::server::{build_router, AppState};
use folio_store::sync::{RemoteConnector, StatusTracker, SyncOutcome, SyncRequest, SyncStatus, Syncer};
use folio_store::{
    AssetAccess, CollectionDef, CollectionScope, ContentStore, EntryPage, EntryReader, EntryWriter, FieldSchema,
    GlobalAccess, GlobalDef, SchemaAccess, SchemaBundle, UploadOptions,
};
use folio_store::Result as StoreResult;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;

fn schema() -> SchemaBundle {
    SchemaBundle {
        collections: vec![CollectionDef::new(
            "posts",
            "slug",
            FieldSchema::object([
                ("slug", FieldSchema::String),
                ("title", FieldSchema::String),
                ("views", FieldSchema::Integer),
                ("cover", FieldSchema::Image),
                ("body", FieldSchema::Markdown),
            ])
            .require(&["slug", "title"]),
        )],
        globals: vec![GlobalDef::new(
            "site",
            FieldSchema::object([("name", FieldSchema::String), ("logo", FieldSchema::Image)]),
        )],
    }
}

fn file_store(public_url: &str, schema: SchemaBundle) -> (TempDir, Arc<FileStore>) {
    let dir = tempdir().unwrap();
    let persistence = Arc::new(Persistence::new(dir.path()).unwrap());
    (dir, Arc::new(FileStore::new(persistence, schema, public_url)))
}

fn app_state(store: Arc<FileStore>, remote_url: Option<String>) -> AppState {
    let syncer = Syncer::new(
        store.clone(),
        Arc::new(HttpConnector::new(remote_url)),
        Arc::new(StatusTracker::new()),
    );
    AppState::new(store, Arc::new(syncer))
}

/// Binds an OS-assigned port, returning the listener and its base URL.
async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, format!("http://127.0.0.1:{}", port))
}

fn serve(listener: TcpListener, app: axum::Router) {
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

#[tokio::test]
async fn test_entry_api() {
    let (listener, base) = bind().await;
    let (_dir, store) = file_store(&base, schema());
    serve(listener, build_router(app_state(store, None)));
    let http = reqwest::Client::new();
    let entry_url = |id: &str| format!("{base}/collections/posts/entries/{id}");

    for (slug, title, views) in [("a", "Alpha", 10), ("b", "Beta", 20), ("c", "Gamma", 30)] {
        let resp = http
            .put(entry_url(slug))
            .json(&json!({ "slug": slug, "title": title, "views": views }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
    }

    let resp = http.get(entry_url("b")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap()["title"], json!("Beta"));

    let resp = http.get(entry_url("zzz")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.json::<Value>().await.unwrap()["error"].is_string());

    // Missing required title leaves the stored entry alone.
    let resp = http.put(entry_url("a")).json(&json!({ "slug": "a" })).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let resp = http.get(entry_url("a")).send().await.unwrap();
    assert_eq!(resp.json::<Value>().await.unwrap()["title"], json!("Alpha"));

    let resp = http
        .get(format!("{base}/collections/posts/entries"))
        .query(&[
            ("filters", r#"{"views":{"$gte":20}}"#),
            ("sort", r#"[{"field":"title","order":"desc"}]"#),
            ("includeCount", "true"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page: EntryPage = resp.json().await.unwrap();
    assert_eq!(page.count, Some(2));
    let titles: Vec<_> = page.entries.iter().map(|e| e["title"].clone()).collect();
    assert_eq!(titles, vec![json!("Gamma"), json!("Beta")]);

    let resp = http
        .get(format!("{base}/collections/posts/entries"))
        .query(&[("filters", "{not json")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = http.delete(entry_url("c")).send().await.unwrap();
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "deleted": true }));
    let resp = http.delete(entry_url("c")).send().await.unwrap();
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "deleted": false }));

    let resp = http.get(format!("{base}/collections/nope/entries")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_client_against_server() {
    let (listener, base) = bind().await;
    let (_dir, store) = file_store(&base, schema());
    serve(listener, build_router(app_state(store, None)));
    let client = Client::new(&base, None).unwrap();

    assert_eq!(client.get_schema().await.unwrap(), schema());

    client
        .set_global_value("site", json!({ "name": "Folio" }))
        .await
        .unwrap();
    assert_eq!(
        client.get_global_value("site").await.unwrap(),
        Some(json!({ "name": "Folio" }))
    );

    let first = client
        .upload_asset(b"first".to_vec(), UploadOptions::new("test.jpg"))
        .await
        .unwrap();
    let second = client
        .upload_asset(b"second".to_vec(), UploadOptions::new("test.jpg"))
        .await
        .unwrap();
    assert_eq!(first.name, "test.jpg");
    assert_eq!(second.name, "test-1.jpg");
    assert_eq!(second.content_type, "image/jpeg");

    let asset = client.get_asset("test.jpg", None).await.unwrap().unwrap();
    assert_eq!(asset.bytes, b"first".to_vec());
    assert_eq!(asset.info.content_type, "image/jpeg");
    let asset = client.get_asset("test-1.jpg", None).await.unwrap().unwrap();
    assert_eq!(asset.bytes, b"second".to_vec());

    assert_eq!(client.list_assets().await.unwrap().len(), 2);
    assert!(client.delete_asset("test.jpg").await.unwrap());
    assert!(client.get_asset("test.jpg", None).await.unwrap().is_none());

    let posts = client.collection("posts");
    posts
        .set("hello", json!({ "slug": "hello", "title": "Hello" }))
        .await
        .unwrap();
    assert!(posts.get("hello").await.unwrap().is_some());
    assert!(client.delete_entry("posts", "hello").await.unwrap());
}

#[tokio::test]
async fn test_sync_up_and_down_over_http() {
    // Remote content service, with the stage mounted under /stages/main.
    let (remote_listener, remote_base) = bind().await;
    let stage_url = format!("{remote_base}/stages/main");
    let (_remote_dir, remote) = file_store(&stage_url, SchemaBundle::default());
    let remote_app = axum::Router::new().nest("/stages/main", build_router(app_state(remote.clone(), None)));
    serve(remote_listener, remote_app);

    // Local site that syncs against it.
    let (site_listener, site_base) = bind().await;
    let (_site_dir, site) = file_store(&site_base, schema());
    serve(
        site_listener,
        build_router(app_state(site.clone(), Some(remote_base.clone()))),
    );

    site.upload_asset(b"cover".to_vec(), UploadOptions::new("cover.png"))
        .await
        .unwrap();
    let local_cover = format!("{site_base}/assets/cover.png");
    for slug in ["one", "two", "three"] {
        site.set_entry(
            "posts",
            slug,
            json!({
                "slug": slug,
                "title": slug.to_uppercase(),
                "cover": { "url": local_cover, "alt": slug },
                "body": format!("![cover]({local_cover})")
            }),
        )
        .await
        .unwrap();
    }
    site.set_global_value("site", json!({ "name": "Folio", "logo": { "url": local_cover } }))
        .await
        .unwrap();

    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{site_base}/sync/up"))
        .json(&json!({ "schema": true, "stage": "main" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("must specify a token"));

    let resp = http
        .post(format!("{site_base}/sync/up"))
        .json(&SyncRequest::all("main", "secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let status: SyncStatus = resp.json().await.unwrap();
    assert_eq!(status.outcome, Some(SyncOutcome::Completed));
    assert!(!status.in_progress);
    // 1 asset + schema + 3 entries + 1 global
    assert_eq!(status.progress.total, 6);
    assert_eq!(status.progress.current, 6);

    let remote_cover = format!("{stage_url}/assets/cover.png");
    let two = remote.get_entry("posts", "two").await.unwrap().unwrap();
    assert_eq!(two["cover"]["url"], json!(remote_cover));
    assert_eq!(two["body"], json!(format!("![cover]({remote_cover})")));
    assert_eq!(two["title"], json!("TWO"));
    let logo = remote.get_global_value("site").await.unwrap().unwrap();
    assert_eq!(logo["logo"]["url"], json!(remote_cover));
    assert_eq!(
        remote.get_asset("cover.png", None).await.unwrap().unwrap().bytes,
        b"cover".to_vec()
    );

    let polled: SyncStatus = http
        .get(format!("{site_base}/sync/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(polled, status);

    // Pull everything back into an empty store.
    let (_fresh_dir, fresh) = file_store(&site_base, SchemaBundle::default());
    let down = Syncer::new(
        fresh.clone(),
        Arc::new(HttpConnector::new(Some(remote_base))),
        Arc::new(StatusTracker::new()),
    );
    let status = down.sync_down(&SyncRequest::all("main", "secret")).await.unwrap();
    assert_eq!(status.outcome, Some(SyncOutcome::Completed));

    assert_eq!(fresh.get_schema().await.unwrap(), schema());
    for slug in ["one", "two", "three"] {
        assert_eq!(
            fresh.get_entry("posts", slug).await.unwrap(),
            site.get_entry("posts", slug).await.unwrap()
        );
    }
    assert_eq!(
        fresh.get_global_value("site").await.unwrap(),
        site.get_global_value("site").await.unwrap()
    );
}

/// Hands out a fixed store after a delay.
struct SlowConnector {
    remote: Arc<dyn ContentStore>,
    delay: Duration,
}

#[async_trait]
impl RemoteConnector for SlowConnector {
    async fn connect(&self, _stage: &str, _token: &str) -> StoreResult<Arc<dyn ContentStore>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.remote.clone())
    }
}

#[tokio::test]
async fn test_sync_survives_client_timeout() {
    let (listener, base) = bind().await;
    let (_dir, site) = file_store(&base, schema());
    let (_remote_dir, remote) = file_store("http://remote.example.com", SchemaBundle::default());
    site.set_entry("posts", "one", json!({ "slug": "one", "title": "One" }))
        .await
        .unwrap();
    let syncer = Syncer::new(
        site.clone(),
        Arc::new(SlowConnector {
            remote: remote.clone(),
            delay: Duration::from_millis(300),
        }),
        Arc::new(StatusTracker::new()),
    );
    serve(listener, build_router(AppState::new(site, Arc::new(syncer))));

    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let err = impatient
        .post(format!("{base}/sync/up"))
        .json(&SyncRequest::all("main", "secret"))
        .send()
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let http = reqwest::Client::new();
    let mut status = SyncStatus::default();
    for _ in 0..100 {
        status = http
            .get(format!("{base}/sync/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !status.in_progress {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!status.in_progress);
    assert_eq!(status.outcome, Some(SyncOutcome::Completed));
    assert!(remote.get_entry("posts", "one").await.unwrap().is_some());

    let resp = http
        .post(format!("{base}/sync/up"))
        .json(&SyncRequest::all("main", "secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
