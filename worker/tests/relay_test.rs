use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use sonobuoy_worker::relay;
use sonobuoy_worker::upload::{progress_url, result_url, upload_result, ResultScope};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// What the fake aggregator received.
#[derive(Debug, Default, Clone)]
struct Received(Arc<Mutex<Vec<(String, Vec<u8>)>>>);

impl Received {
    fn take(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

async fn progress(State(received): State<Received>, body: Bytes) -> (StatusCode, &'static str) {
    received
        .0
        .lock()
        .unwrap()
        .push(("progress".to_string(), body.to_vec()));
    (StatusCode::ACCEPTED, "noted")
}

async fn results(
    State(received): State<Received>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    received.0.lock().unwrap().push((content_type, body.to_vec()));
    StatusCode::OK
}

/// Start a fake aggregator and return its base URL.
async fn aggregator(received: Received) -> String {
    let app = Router::new()
        .route("/api/v1/progress/global/e2e", post(progress))
        .route("/api/v1/results/by-node/node-1/systemd-logs", post(results))
        .with_state(received);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

async fn start_relay(target: String) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(relay::serve(listener, reqwest::Client::new(), target));
    addr
}

#[tokio::test]
async fn progress_is_relayed_verbatim() {
    let received = Received::default();
    let aggregator = aggregator(received.clone()).await;
    let relay = start_relay(progress_url(&aggregator, &ResultScope::Global, "e2e")).await;

    let update = r#"{"name":"e2e","node":"global","msg":"running","total":10,"completed":3}"#;
    let response = reqwest::Client::new()
        .post(format!("http://{}{}", relay, relay::PROGRESS_PATH))
        .body(update)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);
    assert_eq!(response.text().await.unwrap(), "noted");
    assert_eq!(
        received.take(),
        vec![("progress".to_string(), update.as_bytes().to_vec())]
    );
}

#[tokio::test]
async fn unreachable_aggregator_is_a_server_error() {
    // Nothing listens on a port that was just released.
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = format!("http://{}/api/v1/progress/global/e2e", closed.local_addr().unwrap());
    drop(closed);
    let relay = start_relay(target).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}{}", relay, relay::PROGRESS_PATH))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 500);
}

#[tokio::test]
async fn results_are_uploaded_with_their_mime_type() {
    let received = Received::default();
    let aggregator = aggregator(received.clone()).await;
    let dir = TempDir::new().unwrap();
    let result = dir.path().join("systemd_logs.json");
    std::fs::write(&result, br#"{"node":"node-1"}"#).unwrap();

    let url = result_url(
        &aggregator,
        &ResultScope::Node("node-1".to_string()),
        "systemd-logs",
    );
    upload_result(&reqwest::Client::new(), &url, &result)
        .await
        .unwrap();
    assert_eq!(
        received.take(),
        vec![(
            "application/json".to_string(),
            br#"{"node":"node-1"}"#.to_vec()
        )]
    );
}

#[tokio::test]
async fn rejected_uploads_are_errors() {
    let received = Received::default();
    let aggregator = aggregator(received).await;
    let dir = TempDir::new().unwrap();
    let result = dir.path().join("junit_01.xml");
    std::fs::write(&result, "<testsuites/>").unwrap();

    // The fake aggregator has no global e2e results endpoint.
    let url = result_url(&aggregator, &ResultScope::Global, "e2e");
    let error = upload_result(&reqwest::Client::new(), &url, &result)
        .await
        .unwrap_err();
    assert!(error.to_string().contains("status 404"), "{}", error);
}
