use std::sync::Arc;
use std::time::Duration;

use loam_api::{app_router, AppConfig, AppState};
use loam_core::models::{EntityKind, RecordKey, SyncRecord};
use loam_core::store::{
    FormPostRemote, LocalStore, MemoryCursorStore, MemoryLocalStore, MemoryRemoteStore,
    RemoteStore, RestJsonRemote,
};
use loam_core::{Error, SyncEngine, Timestamp};
use pretty_assertions::assert_eq;

const TOKEN: &str = "integration-secret";
const TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    base_url: String,
    store: Arc<MemoryRemoteStore>,
}

async fn spawn_server() -> TestServer {
    let config = Arc::new(AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        api_token: TOKEN.to_string(),
    });
    let store = Arc::new(MemoryRemoteStore::new().with_server_keys());
    let router = app_router(AppState::with_store(config, Arc::clone(&store)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        store,
    }
}

fn record(key: &str, millis: i64) -> SyncRecord {
    SyncRecord::new(key, Timestamp::from_millis(millis))
}

fn keys(records: &[SyncRecord]) -> Vec<&str> {
    let mut keys: Vec<&str> = records.iter().map(|record| record.key.as_str()).collect();
    keys.sort_unstable();
    keys
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_ok_without_auth() {
    let server = spawn_server().await;
    let body: serde_json::Value = reqwest::get(format!("{}/healthz", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["conflicts"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rest_remote_round_trips_through_the_server() {
    let server = spawn_server().await;
    let remote = RestJsonRemote::new(&server.base_url, Some(TOKEN.to_string()), TIMEOUT).unwrap();

    assert!(remote
        .upsert(EntityKind::File, &[record("f1", 100), record("f2", 200)])
        .await
        .unwrap());
    let since = remote
        .fetch_changed_since(EntityKind::File, Some(Timestamp::from_millis(150)))
        .await
        .unwrap();
    assert_eq!(keys(&since), vec!["f2"]);

    let stored = remote
        .upsert_one(EntityKind::Note, &record("local-abc", 10))
        .await
        .unwrap();
    assert_eq!(stored.key.as_str(), "srv-1");
    assert!(server.store.get(EntityKind::Note, "srv-1").is_some());

    assert!(remote
        .delete(EntityKind::File, &[RecordKey::from("f1")])
        .await
        .unwrap());
    let remaining = remote.fetch_changed_since(EntityKind::File, None).await.unwrap();
    assert_eq!(keys(&remaining), vec!["f2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rest_remote_surfaces_auth_and_rejection_errors() {
    let server = spawn_server().await;

    let intruder =
        RestJsonRemote::new(&server.base_url, Some("wrong".to_string()), TIMEOUT).unwrap();
    let error = intruder
        .fetch_changed_since(EntityKind::Note, None)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Remote(message) if message.contains("401")));

    server.store.reject_key("bad");
    let remote = RestJsonRemote::new(&server.base_url, Some(TOKEN.to_string()), TIMEOUT).unwrap();
    assert!(!remote
        .upsert(EntityKind::File, &[record("bad", 1)])
        .await
        .unwrap());
    let error = remote
        .upsert_one(EntityKind::Note, &record("bad", 1))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Remote(message) if message.contains("422")));
}

#[tokio::test(flavor = "multi_thread")]
async fn form_remote_reads_string_timestamps() {
    let server = spawn_server().await;
    let remote = FormPostRemote::new(
        &server.base_url,
        "/legacy/sync",
        Some(TOKEN.to_string()),
        TIMEOUT,
    )
    .unwrap();

    assert!(remote
        .upsert(
            EntityKind::FileReference,
            &[record("r1", 1_700_000_000_123).with_parent("n1")]
        )
        .await
        .unwrap());
    let fetched = remote
        .fetch_changed_since(EntityKind::FileReference, None)
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].updated_at, Timestamp::from_millis(1_700_000_000_123));
    assert_eq!(fetched[0].parent_key.as_ref().map(RecordKey::as_str), Some("n1"));

    let stored = remote
        .upsert_one(EntityKind::Note, &record("local-x", 5))
        .await
        .unwrap();
    assert_eq!(stored.key.as_str(), "srv-1");

    assert!(remote
        .delete(EntityKind::FileReference, &[RecordKey::from("r1")])
        .await
        .unwrap());
    assert!(server.store.records(EntityKind::FileReference).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn form_remote_with_bad_token_fails_cleanly() {
    let server = spawn_server().await;
    let remote = FormPostRemote::new(
        &server.base_url,
        "legacy/sync",
        Some("nope".to_string()),
        TIMEOUT,
    )
    .unwrap();

    let error = remote
        .fetch_changed_since(EntityKind::Note, None)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Remote(message) if message.contains("not valid")));
    assert!(!remote.upsert(EntityKind::Note, &[record("n", 1)]).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_converges_against_the_server() {
    let server = spawn_server().await;
    server.store.upsert(EntityKind::File, &[record("remote-file", 50)]).await.unwrap();

    let local = MemoryLocalStore::new()
        .with_records(EntityKind::Note, [record("local-note", 10)])
        .with_records(
            EntityKind::FileReference,
            [record("ref-1", 11).with_parent("local-note")],
        );
    let remote = RestJsonRemote::new(&server.base_url, Some(TOKEN.to_string()), TIMEOUT).unwrap();
    let engine = SyncEngine::new(local, remote, MemoryCursorStore::new());

    let report = engine.sync().await.unwrap();
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.summary.downloaded, 1);

    let reference = server.store.get(EntityKind::FileReference, "ref-1").unwrap();
    assert_eq!(reference.parent_key.unwrap().as_str(), "srv-1");
    assert!(engine
        .local()
        .get(EntityKind::File, &"remote-file".into())
        .await
        .unwrap()
        .is_some());

    let second = engine.sync().await.unwrap();
    assert!(second.is_success());
    assert!(second.summary.is_empty());
}
