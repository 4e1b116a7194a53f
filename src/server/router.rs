use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use log::{error, info};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::engine::assets::{TransformOptions, UploadOptions};
use crate::engine::schema::SchemaBundle;
use crate::sync::{SyncRequest, SyncStatus, Syncer};
use crate::{ContentStore, EntryQuery, Error, Result, SortKey};

/// Largest accepted request body, asset uploads included.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ContentStore>,
    pub syncer: Arc<Syncer>,
}

impl AppState {
    pub fn new(store: Arc<dyn ContentStore>, syncer: Arc<Syncer>) -> Self {
        Self { store, syncer }
    }
}

/// HTTP front of a content store and its sync orchestrator.
pub struct Router {
    state: AppState,
}

impl Router {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serves the API on `0.0.0.0:<port>` until the process exits.
    pub async fn listen(&self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("Folio Store listening on port {}", port);
        axum::serve(listener, build_router(self.state.clone())).await?;
        Ok(())
    }
}

/// Builds the HTTP API router.
pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/schema", get(get_schema).put(put_schema))
        .route("/collections/{collection}/entries", get(list_entries))
        .route(
            "/collections/{collection}/entries/{id}",
            get(get_entry).put(put_entry).delete(delete_entry),
        )
        .route("/globals/{name}/value", get(get_global).put(put_global))
        .route("/assets", get(list_assets))
        .route("/assets/{name}", get(get_asset).put(upload_asset).delete(delete_asset))
        .route("/sync/status", get(sync_status))
        .route("/sync/up", post(sync_up))
        .route("/sync/down", post(sync_down))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

impl Error {
    /// HTTP status reported for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } | Error::InvalidId(_) | Error::InvalidFilter(_) | Error::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) | Error::UnknownCollection(_) | Error::UnknownGlobal(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Remote { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Query string of `GET /collections/{c}/entries`. `filters` and `sort` are JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntriesParams {
    limit: Option<usize>,
    offset: Option<usize>,
    filters: Option<String>,
    sort: Option<String>,
    include_count: Option<bool>,
}

impl EntriesParams {
    fn into_query(self) -> Result<EntryQuery> {
        let filters = match self.filters.filter(|f| !f.trim().is_empty()) {
            Some(raw) => Some(
                serde_json::from_str::<Value>(&raw).map_err(|e| Error::InvalidFilter(format!("filters is not JSON: {e}")))?,
            ),
            None => None,
        };
        let sort = match self.sort.filter(|s| !s.trim().is_empty()) {
            Some(raw) => serde_json::from_str::<Vec<SortKey>>(&raw)
                .map_err(|e| Error::InvalidRequest(format!("sort must be a list of {{field, order}}: {e}")))?,
            None => Vec::new(),
        };
        Ok(EntryQuery {
            limit: self.limit,
            offset: self.offset,
            filters,
            sort,
            include_count: self.include_count.unwrap_or(false),
        })
    }
}

async fn get_schema(State(state): State<AppState>) -> Result<Json<SchemaBundle>> {
    Ok(Json(state.store.get_schema().await?))
}

async fn put_schema(State(state): State<AppState>, Json(schema): Json<SchemaBundle>) -> Result<StatusCode> {
    state.store.update_schema(schema).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_entries(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<EntriesParams>,
) -> Result<impl IntoResponse> {
    let query = params.into_query()?;
    Ok(Json(state.store.get_entries(&collection, &query).await?))
}

async fn get_entry(State(state): State<AppState>, Path((collection, id)): Path<(String, String)>) -> Result<Json<Value>> {
    match state.store.get_entry(&collection, &id).await? {
        Some(entry) => Ok(Json(entry)),
        None => Err(Error::NotFound(format!("entry {collection}/{id}"))),
    }
}

async fn put_entry(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(data): Json<Value>,
) -> Result<StatusCode> {
    state.store.set_entry(&collection, &id, data).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_entry(State(state): State<AppState>, Path((collection, id)): Path<(String, String)>) -> Result<Json<Value>> {
    let deleted = state.store.delete_entry(&collection, &id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn get_global(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>> {
    match state.store.get_global_value(&name).await? {
        Some(value) => Ok(Json(value)),
        None => Err(Error::NotFound(format!("global {name}"))),
    }
}

async fn put_global(State(state): State<AppState>, Path(name): Path<String>, Json(value): Json<Value>) -> Result<StatusCode> {
    state.store.set_global_value(&name, value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_assets(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.store.list_assets().await?))
}

async fn upload_asset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let options = UploadOptions {
        filename: name,
        content_type,
    };
    let info = state.store.upload_asset(body.to_vec(), options).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn get_asset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(transform): Query<TransformOptions>,
) -> Result<Response> {
    match state.store.get_asset(&name, Some(&transform)).await? {
        Some(asset) => Ok(([(header::CONTENT_TYPE, asset.info.content_type)], asset.bytes).into_response()),
        None => Err(Error::NotFound(format!("asset {name}"))),
    }
}

async fn delete_asset(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>> {
    let deleted = state.store.delete_asset(&name).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.syncer.status())
}

async fn sync_up(State(state): State<AppState>, Json(request): Json<SyncRequest>) -> Result<Json<SyncStatus>> {
    Ok(Json(state.syncer.sync_up(&request).await?))
}

async fn sync_down(State(state): State<AppState>, Json(request): Json<SyncRequest>) -> Result<Json<SyncStatus>> {
    Ok(Json(state.syncer.sync_down(&request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SortOrder;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (Error::InvalidFilter("x".into()), StatusCode::BAD_REQUEST),
            (Error::InvalidRequest("must specify a token".into()), StatusCode::BAD_REQUEST),
            (Error::UnknownCollection("x".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("busy".into()), StatusCode::CONFLICT),
            (
                Error::Remote {
                    status: Some(503),
                    message: "down".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Sync("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn test_entries_params() {
        let params = EntriesParams {
            limit: Some(5),
            filters: Some(r#"{"name":"Abe"}"#.to_string()),
            sort: Some(r#"[{"field":"age","order":"desc"},{"field":"name"}]"#.to_string()),
            include_count: Some(true),
            ..EntriesParams::default()
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.filters, Some(json!({ "name": "Abe" })));
        assert_eq!(query.sort[0].order, SortOrder::Desc);
        assert_eq!(query.sort[1].order, SortOrder::Asc);
        assert!(query.include_count);

        let bad = EntriesParams {
            filters: Some("{".to_string()),
            ..EntriesParams::default()
        };
        assert!(matches!(bad.into_query(), Err(Error::InvalidFilter(_))));
    }
}
