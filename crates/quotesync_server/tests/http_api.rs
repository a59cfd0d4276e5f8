//! End-to-end tests: the axum server on an ephemeral port, driven by the
//! engine's HTTP collaborators.

use quotesync_engine::{
    Actor, FixedStrategy, HttpProbe, HttpQuotationStore, MemoryCache, MemoryQuotationStore,
    QuotationStore, ReachabilityProbe, SyncConfig, SyncError, SyncEventBus, SyncSession,
};
use quotesync_protocol::{
    CreateQuotationRequest, QuotationId, QuotationPatch, QuotationState, ResolutionStrategy,
    StateChangeRequest,
};
use quotesync_server::{ServerConfig, SyncServer};
use quotesync_testkit::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

struct Running {
    store: Arc<MemoryQuotationStore>,
    config: SyncConfig,
}

async fn spawn_server() -> Running {
    let store = Arc::new(MemoryQuotationStore::new());
    let server = SyncServer::with_store(ServerConfig::default().with_staff(["ana"]), store.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    Running {
        store,
        config: SyncConfig::new(format!("http://{addr}")).with_timeout(Duration::from_secs(5)),
    }
}

fn create_request(client: &str) -> CreateQuotationRequest {
    CreateQuotationRequest {
        id: None,
        client_email: client.into(),
        fields: sample_fields(),
    }
}

#[tokio::test]
async fn create_and_read_back() {
    let server = spawn_server().await;
    let client = HttpQuotationStore::new(&server.config).unwrap();

    let created = client.create(create_request(DEFAULT_CLIENT)).await.unwrap();
    assert_eq!(created.state, QuotationState::Cargada);
    assert_eq!(created.version, 1);

    let fetched = client.get(created.id).await.unwrap();
    assert_eq!(fetched, created);

    let listed = client.find_by_client(DEFAULT_CLIENT).await.unwrap();
    assert_eq!(listed, vec![created]);
}

#[tokio::test]
async fn state_change_contract() {
    let server = spawn_server().await;
    let client = HttpQuotationStore::new(&server.config)
        .unwrap()
        .with_actor(Actor::new("u-1", "Ana"));

    let first = client.create(create_request(DEFAULT_CLIENT)).await.unwrap();
    let active = client
        .request_state_change(first.id, &StateChangeRequest::new(QuotationState::Activa))
        .await
        .unwrap();
    assert_eq!(active.state, QuotationState::Activa);
    assert_eq!(active.version, 2);

    // 400 carries the allowed targets.
    let rejected = client
        .request_state_change(first.id, &StateChangeRequest::new(QuotationState::Aceptada))
        .await;
    assert_eq!(
        rejected,
        Err(SyncError::InvalidTransition {
            from: QuotationState::Activa,
            to: QuotationState::Aceptada,
            allowed: vec![
                QuotationState::Cargada,
                QuotationState::Inactiva,
                QuotationState::Expirada
            ],
        })
    );
    assert_eq!(server.store.snapshot(first.id).unwrap().version, 2);

    // 404 for an unknown record.
    let missing = QuotationId::new();
    let result = client
        .request_state_change(missing, &StateChangeRequest::new(QuotationState::Activa))
        .await;
    assert_eq!(result, Err(SyncError::NotFound(missing)));

    // 409 for an un-forced activation clash.
    let second = client.create(create_request(DEFAULT_CLIENT)).await.unwrap();
    let clash = client
        .request_state_change(second.id, &StateChangeRequest::new(QuotationState::Activa))
        .await;
    assert_eq!(
        clash,
        Err(SyncError::ActiveConflict {
            existing: first.id,
            client: DEFAULT_CLIENT.to_string(),
        })
    );

    // Forcing supersedes the previous active quotation.
    let forced = client
        .request_state_change(second.id, &StateChangeRequest::forced(QuotationState::Activa))
        .await
        .unwrap();
    assert_eq!(forced.state, QuotationState::Activa);
    assert_eq!(
        server.store.snapshot(first.id).unwrap().state,
        QuotationState::Inactiva
    );
}

#[tokio::test]
async fn guarded_patch_reports_stale_version() {
    let server = spawn_server().await;
    let client = HttpQuotationStore::new(&server.config).unwrap();
    let record = client.create(create_request(DEFAULT_CLIENT)).await.unwrap();

    let current = client
        .update(record.id, QuotationPatch::fields(sample_fields()).expecting(1))
        .await
        .unwrap();
    assert_eq!(current.version, 2);

    let stale = client
        .update(record.id, QuotationPatch::fields(sample_fields()).expecting(1))
        .await;
    assert_eq!(
        stale,
        Err(SyncError::StaleWrite {
            id: record.id,
            expected: 1,
            actual: 2,
        })
    );
    assert_eq!(server.store.snapshot(record.id).unwrap().version, 2);
}

#[tokio::test]
async fn persistence_fault_is_server_error() {
    let server = spawn_server().await;
    let client = HttpQuotationStore::new(&server.config).unwrap();
    let record = client.create(create_request(DEFAULT_CLIENT)).await.unwrap();

    server.store.set_available(false);
    let result = client
        .request_state_change(record.id, &StateChangeRequest::new(QuotationState::Activa))
        .await;
    assert!(matches!(result, Err(SyncError::Persistence(_))));
}

#[tokio::test]
async fn probe_follows_store_health() {
    let server = spawn_server().await;
    let probe = HttpProbe::new(&server.config).unwrap();
    let client = HttpQuotationStore::new(&server.config).unwrap();

    assert!(probe.probe().await.unwrap());
    assert!(client.ping().await.is_ok());

    server.store.set_available(false);
    assert!(!probe.probe().await.unwrap());
    assert!(client.ping().await.is_err());

    server.store.set_available(true);
    assert!(probe.probe().await.unwrap());
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let server = spawn_server().await;
    let http = reqwest::Client::new();
    let base = &server.config.server_url;

    let response = http.get(format!("{base}/quotations")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = http
        .post(format!("{base}/quotations"))
        .json(&json!({"clientEmail": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let record = HttpQuotationStore::new(&server.config)
        .unwrap()
        .create(create_request(DEFAULT_CLIENT))
        .await
        .unwrap();
    let response = http
        .patch(format!("{base}/quotations/{}", record.id))
        .json(&QuotationPatch::state(QuotationState::Activa))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("/state"));
}

#[tokio::test]
async fn session_resolves_against_server() {
    let server = spawn_server().await;
    let store = Arc::new(HttpQuotationStore::new(&server.config).unwrap());
    let cache = Arc::new(MemoryCache::new());
    let probe = Arc::new(HttpProbe::new(&server.config).unwrap());

    let original = store.create(create_request(DEFAULT_CLIENT)).await.unwrap();
    cache.insert(original.clone());

    // Someone else edits the record on the server.
    let mut edited = original.fields.clone();
    edited.insert("empresa".into(), json!("Ferretería Sur"));
    server
        .store
        .update(original.id, QuotationPatch::fields(edited))
        .await
        .unwrap();

    let session = SyncSession::new(
        &server.config,
        store.clone(),
        cache.clone(),
        probe,
        SyncEventBus::new(),
    );
    session.track(original.id);
    session.set_decider(Arc::new(FixedStrategy(ResolutionStrategy::KeepLocal)));

    let report = session.sync_now().await;
    assert!(report.success());
    assert_eq!(report.resolved.len(), 1);

    let pushed = server.store.snapshot(original.id).unwrap();
    assert_eq!(pushed.version, 3);
    assert_eq!(pushed.field("empresa"), original.field("empresa"));
    assert_eq!(cache.snapshot(original.id), Some(pushed));
}
