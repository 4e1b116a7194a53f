use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::engine::assets::{content_type_for, AssetInfo, TransformOptions, UploadOptions};
use crate::engine::schema::SchemaBundle;
use crate::sync::RemoteConnector;
use crate::{
    Asset, AssetAccess, CollectionScope, ContentStore, EntryPage, EntryQuery, EntryReader, EntryWriter, Error,
    GlobalAccess, Result, SchemaAccess, ScopedCollection,
};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct Deleted {
    deleted: bool,
}

/// HTTP client for a remote Folio content service.
///
/// Every request carries the bearer token when one is set. A 404 on a single-record read
/// comes back as `None`; any other non-success status becomes [`Error::Remote`].
pub struct Client {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl Client {
    /// Creates a client for the service rooted at `base_url`.
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| Error::InvalidRequest(format!("invalid base URL {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidRequest(format!("invalid base URL {base_url:?}")));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: token.map(str::to_string),
        })
    }

    /// Creates a client for one stage of a content service: `<remote_url>/stages/<stage>`.
    pub fn for_stage(remote_url: &str, stage: &str, token: Option<&str>) -> Result<Self> {
        let mut client = Self::new(remote_url, token)?;
        client.base = client.endpoint(&["stages", stage])?;
        Ok(client)
    }

    /// Replaces the underlying HTTP client, e.g. to set timeouts.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidRequest(format!("invalid base URL {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(remote_error(response).await)
        }
    }

    /// Like [`Client::send`], but a 404 is `None`.
    async fn send_optional(&self, builder: RequestBuilder) -> Result<Option<Response>> {
        let response = builder.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status().is_success() {
            Ok(Some(response))
        } else {
            Err(remote_error(response).await)
        }
    }
}

async fn remote_error(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.is_empty() => status.canonical_reason().unwrap_or("request failed").to_string(),
        Err(_) => body,
    };
    Error::Remote {
        status: Some(status.as_u16()),
        message,
    }
}

fn entry_params(query: &EntryQuery) -> Result<Vec<(&'static str, String)>> {
    let mut params = Vec::new();
    if let Some(limit) = query.limit {
        params.push(("limit", limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset", offset.to_string()));
    }
    if let Some(filters) = &query.filters {
        params.push(("filters", serde_json::to_string(filters)?));
    }
    if !query.sort.is_empty() {
        params.push(("sort", serde_json::to_string(&query.sort)?));
    }
    if query.include_count {
        params.push(("includeCount", "true".to_string()));
    }
    Ok(params)
}

#[async_trait]
impl EntryReader for Client {
    async fn get_entry(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let url = self.endpoint(&["collections", collection, "entries", id])?;
        match self.send_optional(self.request(Method::GET, url)).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    async fn get_entries(&self, collection: &str, query: &EntryQuery) -> Result<EntryPage> {
        let url = self.endpoint(&["collections", collection, "entries"])?;
        let builder = self.request(Method::GET, url).query(&entry_params(query)?);
        Ok(self.send(builder).await?.json().await?)
    }
}

#[async_trait]
impl EntryWriter for Client {
    async fn set_entry(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        let url = self.endpoint(&["collections", collection, "entries", id])?;
        self.send(self.request(Method::PUT, url).json(&data)).await?;
        Ok(())
    }

    async fn delete_entry(&self, collection: &str, id: &str) -> Result<bool> {
        let url = self.endpoint(&["collections", collection, "entries", id])?;
        let deleted: Deleted = self.send(self.request(Method::DELETE, url)).await?.json().await?;
        Ok(deleted.deleted)
    }
}

#[async_trait]
impl GlobalAccess for Client {
    async fn get_global_value(&self, name: &str) -> Result<Option<Value>> {
        let url = self.endpoint(&["globals", name, "value"])?;
        match self.send_optional(self.request(Method::GET, url)).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    async fn set_global_value(&self, name: &str, value: Value) -> Result<()> {
        let url = self.endpoint(&["globals", name, "value"])?;
        self.send(self.request(Method::PUT, url).json(&value)).await?;
        Ok(())
    }
}

#[async_trait]
impl AssetAccess for Client {
    async fn list_assets(&self) -> Result<Vec<AssetInfo>> {
        let url = self.endpoint(&["assets"])?;
        Ok(self.send(self.request(Method::GET, url)).await?.json().await?)
    }

    async fn upload_asset(&self, bytes: Vec<u8>, options: UploadOptions) -> Result<AssetInfo> {
        let url = self.endpoint(&["assets", &options.filename])?;
        let content_type = options
            .content_type
            .unwrap_or_else(|| content_type_for(&options.filename));
        let builder = self
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes);
        Ok(self.send(builder).await?.json().await?)
    }

    async fn get_asset(&self, name: &str, transform: Option<&TransformOptions>) -> Result<Option<Asset>> {
        let url = self.endpoint(&["assets", name])?;
        let mut builder = self.request(Method::GET, url);
        if let Some(options) = transform.filter(|t| t.is_requested()) {
            builder = builder.query(options);
        }
        let Some(response) = self.send_optional(builder).await? else {
            return Ok(None);
        };
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| content_type_for(name));
        let bytes = response.bytes().await?.to_vec();
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
        let url = self.endpoint(&["assets", name])?;
        let deleted: Deleted = self.send(self.request(Method::DELETE, url)).await?.json().await?;
        Ok(deleted.deleted)
    }
}

#[async_trait]
impl SchemaAccess for Client {
    async fn get_schema(&self) -> Result<SchemaBundle> {
        let url = self.endpoint(&["schema"])?;
        Ok(self.send(self.request(Method::GET, url)).await?.json().await?)
    }

    async fn update_schema(&self, schema: SchemaBundle) -> Result<()> {
        let url = self.endpoint(&["schema"])?;
        self.send(self.request(Method::PUT, url).json(&schema)).await?;
        Ok(())
    }
}

impl ContentStore for Client {
    fn asset_base_url(&self) -> String {
        format!("{}/assets", self.base.as_str().trim_end_matches('/'))
    }

    fn collection(&self, name: &str) -> Box<dyn CollectionScope + '_> {
        Box::new(ScopedCollection::new(self, name))
    }
}

/// Connects sync runs to `<remote_url>/stages/<stage>` over HTTP.
pub struct HttpConnector {
    remote_url: Option<String>,
}

impl HttpConnector {
    /// Without a remote URL every connection attempt fails.
    pub fn new(remote_url: Option<String>) -> Self {
        Self { remote_url }
    }
}

#[async_trait]
impl RemoteConnector for HttpConnector {
    async fn connect(&self, stage: &str, token: &str) -> Result<Arc<dyn ContentStore>> {
        let remote_url = self
            .remote_url
            .as_deref()
            .ok_or_else(|| Error::InvalidRequest("no remote content service configured".to_string()))?;
        Ok(Arc::new(Client::for_stage(remote_url, stage, Some(token))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SortKey, SortOrder};
    use serde_json::json;

    #[test]
    fn test_endpoints_are_encoded() {
        let client = Client::for_stage("https://cms.example.com/api/", "main", Some("t")).unwrap();
        assert_eq!(client.base_url().as_str(), "https://cms.example.com/api/stages/main");
        assert_eq!(client.asset_base_url(), "https://cms.example.com/api/stages/main/assets");

        let url = client.endpoint(&["assets", "my photo.jpg"]).unwrap();
        assert_eq!(url.as_str(), "https://cms.example.com/api/stages/main/assets/my%20photo.jpg");
        let url = client.endpoint(&["collections", "posts", "entries", "a/b"]).unwrap();
        assert!(url.as_str().ends_with("/entries/a%2Fb"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(Client::new("not a url", None), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_entry_params() {
        let query = EntryQuery {
            limit: Some(10),
            offset: Some(20),
            filters: Some(json!({ "age": { "$gt": 3 } })),
            sort: vec![SortKey {
                field: "name".to_string(),
                order: SortOrder::Desc,
            }],
            include_count: true,
        };
        let params = entry_params(&query).unwrap();
        assert_eq!(
            params,
            vec![
                ("limit", "10".to_string()),
                ("offset", "20".to_string()),
                ("filters", r#"{"age":{"$gt":3}}"#.to_string()),
                ("sort", r#"[{"field":"name","order":"desc"}]"#.to_string()),
                ("includeCount", "true".to_string()),
            ]
        );
        assert!(entry_params(&EntryQuery::default()).unwrap().is_empty());
    }
}
