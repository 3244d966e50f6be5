//! End-to-end behaviour of a running application against a scripted network.

use std::sync::Arc;
use std::time::Duration;

use agrosentinel_app::{App, AppConfig, ReadPolicy};
use agrosentinel_common::{Coordinates, Outcome};
use agrosentinel_sync::DrainOutcome;
use agrosentinel_transport::{
    Method, MemoryTransport, Reply, Request, Response, StatusCode, Url, IDEMPOTENCY_KEY,
};
use serde_json::json;
use tempfile::TempDir;

const SHELL: &str = "<!doctype html><div id=\"root\"></div>";

fn network() -> Arc<MemoryTransport> {
    let transport = Arc::new(MemoryTransport::new());
    for path in ["/", "/index.html"] {
        transport.route(Method::GET, path, Response::new(StatusCode::OK, SHELL));
    }
    transport.route_json(
        Method::GET,
        "/manifest.json",
        StatusCode::OK,
        json!({ "name": "AgroSentinel" }),
    );
    transport.route_json(
        Method::POST,
        "/api/analyze",
        StatusCode::OK,
        json!({
            "disease": "Tomato___Early_blight",
            "confidence": 0.88,
            "risk_score": 54.0,
            "risk_level": "medium"
        }),
    );
    transport
}

fn config(temp: &TempDir) -> AppConfig {
    AppConfig {
        store_path: Some(temp.path().join("offline.db")),
        request_timeout: Duration::from_secs(2),
        ..AppConfig::default()
    }
}

async fn start(temp: &TempDir, transport: &Arc<MemoryTransport>, online: bool) -> App {
    transport.set_online(online);
    App::start(config(temp), transport.clone(), online)
        .await
        .unwrap()
}

fn reconnect(app: &App, transport: &MemoryTransport) {
    transport.set_online(true);
    assert!(app.set_online(true));
}

fn disconnect(app: &App, transport: &MemoryTransport) {
    transport.set_online(false);
    assert!(app.set_online(false));
}

async fn wait_for_empty_queue(app: &App) {
    for _ in 0..200 {
        if app.client().pending_count().await == Outcome::Ok(0) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not drain");
}

fn field(n: usize) -> Coordinates {
    Coordinates::new(17.38 + n as f64 * 0.01, 78.48).unwrap()
}

#[tokio::test]
async fn test_offline_writes_drain_on_reconnect() {
    let temp = TempDir::new().unwrap();
    let transport = network();
    let app = start(&temp, &transport, false).await;
    let client = app.client().clone();
    const N: usize = 4;

    let before = client.history(100).await.ok().unwrap().len();
    let mut receipts = Vec::new();
    for n in 0..N {
        match client.analyze(vec![n as u8; 16], field(n)).await {
            Outcome::Pending(receipt) => receipts.push(receipt.id),
            other => panic!("expected pending, got {:?}", other),
        }
    }
    assert!(transport.requests_to(Method::POST, "/api/analyze").is_empty());

    reconnect(&app, &transport);
    wait_for_empty_queue(&app).await;

    let history = client.history(100).await.ok().unwrap();
    assert_eq!(history.len(), before + N);
    assert!(history.iter().all(|r| r.source_timestamp.is_some()));

    let sent = transport.requests_to(Method::POST, "/api/analyze");
    assert_eq!(sent.len(), N);
    let keys: Vec<_> = sent
        .iter()
        .map(|r| r.header(IDEMPOTENCY_KEY).unwrap().to_string())
        .collect();
    let expected: Vec<_> = receipts.iter().map(|id| id.to_string()).collect();
    assert_eq!(keys, expected);

    app.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_attempts_each_write_once() {
    let temp = TempDir::new().unwrap();
    let transport = network();
    let app = start(&temp, &transport, false).await;
    let client = app.client().clone();

    for n in 0..2 {
        assert!(client.analyze(vec![n as u8; 8], field(n)).await.is_pending());
        transport.script(Method::POST, "/api/analyze", Reply::Unreachable);
    }

    reconnect(&app, &transport);
    for _ in 0..200 {
        if transport.requests_to(Method::POST, "/api/analyze").len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Backoff is seconds away; anything more here is a second drain.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(transport.requests_to(Method::POST, "/api/analyze").len(), 2);
    assert_eq!(client.pending_count().await, Outcome::Ok(2));

    app.shutdown().await;
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let temp = TempDir::new().unwrap();
    let transport = network();

    let app = start(&temp, &transport, false).await;
    assert!(app.client().analyze(vec![7u8; 4], field(0)).await.is_pending());
    assert!(app.client().analyze(vec![8u8; 4], field(1)).await.is_pending());
    app.shutdown().await;

    let app = start(&temp, &transport, true).await;
    assert_eq!(app.client().pending_count().await, Outcome::Ok(2));

    match app.client().sync_now().await {
        Outcome::Ok(DrainOutcome::Completed(report)) => {
            assert_eq!(report.synced_count, 2);
            assert_eq!(report.failed_count, 0);
        }
        // The periodic or startup drain may already be running.
        Outcome::Ok(DrainOutcome::AlreadyRunning) => wait_for_empty_queue(&app).await,
        other => panic!("unexpected drain outcome {:?}", other),
    }
    assert_eq!(app.client().pending_count().await, Outcome::Ok(0));
    assert_eq!(app.client().history(10).await.ok().unwrap().len(), 2);

    app.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_sync_requests_deliver_once() {
    let temp = TempDir::new().unwrap();
    let transport = network();
    let app = start(&temp, &transport, false).await;
    let client = app.client().clone();

    for n in 0..3 {
        assert!(client.analyze(vec![n as u8; 4], field(n)).await.is_pending());
        transport.script(
            Method::POST,
            "/api/analyze",
            Reply::Delayed(
                Duration::from_millis(30),
                Response::json(StatusCode::OK, &json!({ "disease": "Rice___Brown_spot" })),
            ),
        );
    }

    reconnect(&app, &transport);
    let (first, second) = tokio::join!(client.sync_now(), client.sync_now());
    wait_for_empty_queue(&app).await;

    match first {
        Outcome::Ok(DrainOutcome::Completed(report)) => assert_eq!(report.synced_count, 3),
        other => panic!("expected a completed drain, got {:?}", other),
    }
    assert_eq!(second, Outcome::Ok(DrainOutcome::AlreadyRunning));
    assert_eq!(transport.requests_to(Method::POST, "/api/analyze").len(), 3);

    app.shutdown().await;
}

#[tokio::test]
async fn test_cache_freshness_and_stale_fallback() {
    let temp = TempDir::new().unwrap();
    let transport = network();
    transport.route_json(
        Method::GET,
        "/api/crops",
        StatusCode::OK,
        json!({ "crops": ["rice", "tomato"] }),
    );
    let app = start(&temp, &transport, true).await;
    let client = app.client().clone();
    let policy = ReadPolicy::CacheFirst {
        ttl: Duration::from_millis(80),
    };
    let calls = || transport.requests_to(Method::GET, "/api/crops").len();

    let first = client.read_json(&["crops"], &[], policy).await;
    assert_eq!(first, Outcome::Ok(json!({ "crops": ["rice", "tomato"] })));
    assert_eq!(calls(), 1);

    // Fresh: served without touching the network.
    assert!(client.read_json(&["crops"], &[], policy).await.is_ok());
    assert_eq!(calls(), 1);

    // Expired and online: live fetch.
    tokio::time::sleep(Duration::from_millis(120)).await;
    transport.route_json(
        Method::GET,
        "/api/crops",
        StatusCode::OK,
        json!({ "crops": ["rice", "tomato", "chilli"] }),
    );
    let refreshed = client.read_json(&["crops"], &[], policy).await.ok().unwrap();
    assert_eq!(calls(), 2);
    assert_eq!(refreshed["crops"].as_array().unwrap().len(), 3);

    // Expired and offline: the stale copy, not a failure.
    tokio::time::sleep(Duration::from_millis(120)).await;
    disconnect(&app, &transport);
    let stale = client.read_json(&["crops"], &[], policy).await;
    assert_eq!(stale, Outcome::Ok(json!({ "crops": ["rice", "tomato", "chilli"] })));

    app.shutdown().await;
}

#[tokio::test]
async fn test_offline_read_without_cache_is_structured() {
    let temp = TempDir::new().unwrap();
    let transport = network();
    let app = start(&temp, &transport, true).await;
    disconnect(&app, &transport);

    let outcome = app
        .client()
        .read_json(&["weather"], &[("latitude", "17.38".to_string())], ReadPolicy::NetworkFirst)
        .await;
    assert_eq!(outcome, Outcome::Offline("You are offline".to_string()));

    // The arbiter answers the same request with the synthesized body.
    let url = Url::parse("http://localhost:5173/api/weather?latitude=17.38").unwrap();
    let response = app.arbiter().handle(&Request::get(url)).await.unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.body_json().unwrap();
    assert_eq!(body["error"], "offline");
    assert_eq!(body["offline"], true);

    app.shutdown().await;
}

#[tokio::test]
async fn test_shell_served_offline_after_install() {
    let temp = TempDir::new().unwrap();
    let transport = network();
    let app = start(&temp, &transport, true).await;
    disconnect(&app, &transport);

    let url = Url::parse("http://localhost:5173/history").unwrap();
    let response = app.arbiter().handle(&Request::navigate(url)).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, SHELL);

    app.shutdown().await;
}
