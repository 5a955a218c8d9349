//! End-to-end tests for the HTTP resolver and transport.
//!
//! A mock server plays both the upload-URL service and the storage backend.

use std::sync::Arc;
use std::time::Duration;

use runpush_agent::{HttpResolver, HttpTransport, UploadDestination};
use runpush_core::{BatcherConfig, DestinationBatcher, DestinationResolver, FilePusher, PusherConfig};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const URLS_PATH: &str = "/v1/projects/vision/runs/r42/upload-urls";

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

async fn mount_upload_urls(server: &MockServer) {
    let base = server.uri();
    Mock::given(method("POST"))
        .and(path(URLS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": {
                "output.log": {"url": format!("{base}/storage/output.log")},
                "config.yaml": {
                    "url": format!("{base}/storage/config.yaml"),
                    "headers": {"x-upload-token": "t0k3n"}
                }
            }
        })))
        .mount(server)
        .await;
}

fn transport(server: &MockServer) -> (Arc<HttpTransport>, DestinationBatcher<UploadDestination>) {
    let client = client();
    let resolver = Arc::new(HttpResolver::new(client.clone(), server.uri()));
    let destinations =
        DestinationBatcher::new(resolver, BatcherConfig::new("vision", "r42")).unwrap();
    (
        Arc::new(HttpTransport::new(client, destinations.clone())),
        destinations,
    )
}

#[tokio::test]
async fn test_resolver_posts_names_and_parses_destinations() {
    let server = MockServer::start().await;
    mount_upload_urls(&server).await;

    let resolver = HttpResolver::new(client(), server.uri());
    let names = vec!["output.log".to_string(), "config.yaml".to_string()];
    let resolved = resolver.resolve("vision", "r42", &names).await.unwrap();

    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved["config.yaml"].headers["x-upload-token"], "t0k3n");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body, json!({"files": ["output.log", "config.yaml"]}));
}

#[tokio::test]
async fn test_resolver_error_status_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(URLS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let resolver = HttpResolver::new(client(), server.uri());
    let err = resolver
        .resolve("vision", "r42", &["output.log".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pusher_uploads_files_over_http() {
    let server = MockServer::start().await;
    mount_upload_urls(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let log = dir.path().join("output.log");
    let cfg = dir.path().join("config.yaml");
    std::fs::write(&log, b"epoch 1 loss 0.42\n").unwrap();
    std::fs::write(&cfg, b"lr: 0.001\n").unwrap();

    let (transport, destinations) = transport(&server);
    let pusher = FilePusher::new(transport, PusherConfig::with_max_jobs(2)).unwrap();
    pusher.notify_changed("output.log", &log, false);
    pusher.notify_changed("config.yaml", &cfg, true);

    let summary = pusher.join().await.unwrap();
    destinations.join().await;
    assert!(summary.is_success(), "failures: {:?}", summary.failures);

    let requests = server.received_requests().await.unwrap();
    let puts: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "PUT")
        .collect();
    assert_eq!(puts.len(), 2);

    let config_put = puts
        .iter()
        .find(|r| r.url.path() == "/storage/config.yaml")
        .unwrap();
    assert_eq!(config_put.body, b"lr: 0.001\n");
    assert_eq!(
        config_put.headers.get("x-upload-token").unwrap().to_str().unwrap(),
        "t0k3n"
    );

    let log_put = puts
        .iter()
        .find(|r| r.url.path() == "/storage/output.log")
        .unwrap();
    assert_eq!(log_put.body, b"epoch 1 loss 0.42\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_put_and_missing_destination_are_failures() {
    let server = MockServer::start().await;
    mount_upload_urls(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string("expired signature"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let log = dir.path().join("output.log");
    let other = dir.path().join("unknown.bin");
    std::fs::write(&log, b"x").unwrap();
    std::fs::write(&other, b"y").unwrap();

    let (transport, destinations) = transport(&server);
    let pusher = FilePusher::new(transport, PusherConfig::default()).unwrap();
    pusher.notify_changed("output.log", &log, false);
    pusher.notify_changed("unknown.bin", &other, false);

    let summary = pusher.join().await.unwrap();
    destinations.join().await;

    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.failures.len(), 2);

    let rejected = summary
        .failures
        .iter()
        .find(|f| f.save_name == "output.log")
        .unwrap();
    assert!(rejected.error.contains("403"));

    let missing = summary
        .failures
        .iter()
        .find(|f| f.save_name == "unknown.bin")
        .unwrap();
    assert!(missing.error.contains("no destination issued for unknown.bin"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_file_is_streamed_with_content_length() {
    let server = MockServer::start().await;
    mount_upload_urls(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let checkpoint = dir.path().join("output.log");
    let content: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&checkpoint, &content).unwrap();

    let (transport, destinations) = transport(&server);
    let pusher = FilePusher::new(transport, PusherConfig::with_max_jobs(1)).unwrap();
    pusher.notify_changed("output.log", &checkpoint, false);

    let summary = pusher.join().await.unwrap();
    destinations.join().await;
    assert!(summary.is_success(), "failures: {:?}", summary.failures);

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    assert_eq!(
        put.headers.get("content-length").unwrap().to_str().unwrap(),
        content.len().to_string()
    );
    assert_eq!(put.body.len(), content.len());
    assert!(put.body == content);
}
