use folio_store::sdk::Client;
use folio_store::{AssetAccess, EntryQuery, EntryReader, EntryWriter, Error, UploadOptions};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> Client {
    Client::for_stage(&server.uri(), "main", Some("secret")).unwrap()
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stages/main/collections/posts/entries/p1"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "slug": "p1" })))
        .expect(1)
        .mount(&server)
        .await;

    let entry = client(&server).get_entry("posts", "p1").await.unwrap();
    assert_eq!(entry, Some(json!({ "slug": "p1" })));
}

#[tokio::test]
async fn test_missing_entry_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stages/main/collections/posts/entries/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "not found" })))
        .mount(&server)
        .await;

    assert_eq!(client(&server).get_entry("posts", "nope").await.unwrap(), None);
}

#[tokio::test]
async fn test_server_errors_are_retryable_remote_errors() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/stages/main/collections/posts/entries/p1"))
        .and(body_json(json!({ "slug": "p1" })))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "error": "overloaded" })))
        .mount(&server)
        .await;

    let err = client(&server)
        .set_entry("posts", "p1", json!({ "slug": "p1" }))
        .await
        .unwrap_err();
    match &err {
        Error::Remote { status, message } => {
            assert_eq!(*status, Some(503));
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_validation_rejection_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/stages/main/collections/posts/entries/p1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "validation failed" })))
        .mount(&server)
        .await;

    let err = client(&server).set_entry("posts", "p1", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Remote { status: Some(400), .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_count_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stages/main/collections/posts/entries"))
        .and(query_param("limit", "0"))
        .and(query_param("includeCount", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [],
            "limit": 0,
            "offset": 0,
            "count": 7
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server)
        .get_entries("posts", &EntryQuery::count_only())
        .await
        .unwrap();
    assert_eq!(page.count, Some(7));
    assert!(page.entries.is_empty());
}

#[tokio::test]
async fn test_upload_sends_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/stages/main/assets/a.jpg"))
        .and(header("content-type", "image/jpeg"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "a.jpg",
            "size": 4,
            "contentType": "image/jpeg"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = client(&server)
        .upload_asset(b"jpeg".to_vec(), UploadOptions::new("a.jpg"))
        .await
        .unwrap();
    assert_eq!(info.name, "a.jpg");
    assert_eq!(info.size, 4);
}
