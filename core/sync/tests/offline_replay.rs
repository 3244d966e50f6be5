//! Queued writes survive a restart and replay exactly once on reconnect.

use std::collections::HashSet;
use std::sync::Arc;

use agrosentinel_common::{Coordinates, PendingWrite, WriteContext};
use agrosentinel_store::Store;
use agrosentinel_sync::{
    ConnectivityMonitor, DrainOutcome, SyncConfig, SyncCoordinator, TriggerReason,
};
use agrosentinel_transport::{
    ApiClient, MemoryTransport, Method, StatusCode, Url, IDEMPOTENCY_KEY,
};
use tempfile::TempDir;

fn coordinator(
    store: Store,
    transport: Arc<MemoryTransport>,
    connectivity: Arc<ConnectivityMonitor>,
) -> SyncCoordinator {
    let api = ApiClient::new(transport, Url::parse("http://localhost/api").unwrap()).unwrap();
    SyncCoordinator::new(store, Arc::new(api), connectivity, SyncConfig::default())
}

#[tokio::test]
async fn test_offline_writes_replay_after_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("offline.db");
    const N: usize = 5;

    // First session: offline the whole time.
    let mut queued = Vec::new();
    {
        let store = Store::open(&path).await.unwrap();
        let transport = Arc::new(MemoryTransport::new());
        transport.set_online(false);
        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let coordinator = coordinator(store.clone(), transport.clone(), connectivity);

        for n in 0..N {
            let coords = Coordinates::new(10.0 + n as f64, 76.0).unwrap();
            let write = PendingWrite::new(vec![n as u8], WriteContext::new(coords));
            queued.push(store.enqueue(write).await.unwrap());
        }

        let outcome = coordinator.trigger(TriggerReason::Requested).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Offline);
        assert!(transport.requests().is_empty());
        assert_eq!(store.count_pending().await.unwrap(), N as u64);
    }

    // Second session: the network is back.
    let store = Store::open(&path).await.unwrap();
    let transport = Arc::new(MemoryTransport::new());
    transport.route_json(
        Method::POST,
        "/api/analyze",
        StatusCode::OK,
        serde_json::json!({
            "disease": "Potato___healthy",
            "confidence": 0.97,
            "risk_score": 12.0,
            "risk_level": "low"
        }),
    );
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let coordinator = coordinator(store.clone(), transport.clone(), connectivity.clone());

    connectivity.set_online(true);
    let outcome = coordinator
        .trigger(TriggerReason::Reconnected)
        .await
        .unwrap();
    assert_eq!(outcome.report().map(|r| r.synced_count), Some(N));

    assert_eq!(store.count_pending().await.unwrap(), 0);
    assert_eq!(store.count_records().await.unwrap(), N as u64);

    // One delivery per queued write, each keyed by its pending id.
    let keys: HashSet<String> = transport
        .requests_to(Method::POST, "/api/analyze")
        .iter()
        .filter_map(|r| r.header(IDEMPOTENCY_KEY).map(str::to_string))
        .collect();
    let expected: HashSet<String> = queued.iter().map(|id| id.to_string()).collect();
    assert_eq!(keys, expected);

    // A second drain has nothing left to do.
    let again = coordinator.trigger(TriggerReason::Requested).await.unwrap();
    assert_eq!(again.report().map(|r| r.synced_count), Some(0));
    assert_eq!(store.count_records().await.unwrap(), N as u64);

    for record in store.list_records(50).await.unwrap() {
        assert_eq!(record.analysis().unwrap().risk_level, "low");
        assert!(record.source_timestamp.is_some());
    }
}
