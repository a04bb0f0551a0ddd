//! Integration tests for the orchestrator HTTP surface.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::routes::transfers::AppState;
use orchestrator::{
    CircuitBreaker, CircuitBreakerConfig, InMemoryGuard, InMemoryLedger, InMemoryTransferStore,
    RetryConfig, SagaExecutor,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestHarness {
    app: axum::Router,
    store: InMemoryTransferStore,
    ledger: InMemoryLedger,
}

fn setup() -> TestHarness {
    let store = InMemoryTransferStore::new();
    let ledger = InMemoryLedger::new();
    let guard = InMemoryGuard::new();
    let saga = SagaExecutor::new(
        store.clone(),
        ledger.clone(),
        guard,
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
    )
    .with_retry_config(RetryConfig {
        max_attempts: 2,
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(2),
        backoff_multiple: 2.0,
    });

    let state = Arc::new(AppState {
        saga,
        cancel: CancellationToken::new(),
    });
    TestHarness {
        app: orchestrator::create_app(state, get_metrics_handle()),
        store,
        ledger,
    }
}

fn transfer_body(from: Uuid, to: Uuid, amount: i64, key: &str) -> String {
    serde_json::json!({
        "from_account_id": from.to_string(),
        "to_account_id": to.to_string(),
        "amount_minor": amount,
        "currency": "USD",
        "idempotency_key": key,
    })
    .to_string()
}

fn post_transfer(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/transfers")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn completed_transfer_returns_201_with_entry_id() {
    let h = setup();
    let response = h
        .app
        .oneshot(post_transfer(transfer_body(
            Uuid::new_v4(),
            Uuid::new_v4(),
            5000,
            "key-201",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "COMPLETED");
    assert!(json["entry_id"].is_string());
    assert!(json["transfer_id"].is_string());
}

#[tokio::test]
async fn same_account_transfer_is_rejected() {
    let h = setup();
    let account = Uuid::new_v4();
    let response = h
        .app
        .oneshot(post_transfer(transfer_body(account, account, 100, "k")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let h = setup();
    let response = h
        .app
        .oneshot(post_transfer(transfer_body(
            Uuid::new_v4(),
            Uuid::new_v4(),
            0,
            "k",
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_account_uuid_is_rejected() {
    let h = setup();
    let body = serde_json::json!({
        "from_account_id": "nope",
        "to_account_id": Uuid::new_v4().to_string(),
        "amount_minor": 100,
        "currency": "USD",
        "idempotency_key": "k",
    })
    .to_string();

    let response = h.app.oneshot(post_transfer(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sequential_duplicates_collapse_to_one_transfer() {
    let h = setup();
    let (from, to) = (Uuid::new_v4(), Uuid::new_v4());

    let mut transfer_ids = Vec::new();
    for _ in 0..3 {
        let response = h
            .app
            .clone()
            .oneshot(post_transfer(transfer_body(from, to, 5000, "idem-seq")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        transfer_ids.push(body_json(response).await["transfer_id"].clone());
    }

    assert_eq!(transfer_ids[0], transfer_ids[1]);
    assert_eq!(transfer_ids[1], transfer_ids[2]);
    assert_eq!(h.store.transfer_count(), 1);
    assert_eq!(h.ledger.post_calls(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_storm_yields_one_transfer() {
    let h = setup();
    let (from, to) = (Uuid::new_v4(), Uuid::new_v4());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = h.app.clone();
        let body = transfer_body(from, to, 3000, "idem-storm");
        handles.push(tokio::spawn(async move {
            let response = app.oneshot(post_transfer(body)).await.unwrap();
            let status = response.status();
            (status, body_json(response).await)
        }));
    }

    let mut success_ids = Vec::new();
    for handle in handles {
        let (status, json) = handle.await.unwrap();
        match status {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                success_ids.push(json["transfer_id"].as_str().unwrap().to_string());
            }
            StatusCode::CONFLICT => {}
            other => panic!("unexpected status {other}"),
        }
    }

    assert!(!success_ids.is_empty());
    success_ids.sort();
    success_ids.dedup();
    assert_eq!(success_ids.len(), 1);
    assert_eq!(h.store.transfer_count(), 1);
    assert_eq!(h.ledger.post_calls(), 1);
}

#[tokio::test]
async fn conflicting_payload_returns_original_transfer() {
    let h = setup();
    let (from, to) = (Uuid::new_v4(), Uuid::new_v4());

    let first = h
        .app
        .clone()
        .oneshot(post_transfer(transfer_body(from, to, 1000, "idem-conflict")))
        .await
        .unwrap();
    let first_json = body_json(first).await;

    let second = h
        .app
        .oneshot(post_transfer(transfer_body(from, to, 5000, "idem-conflict")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    let second_json = body_json(second).await;

    assert_eq!(first_json["transfer_id"], second_json["transfer_id"]);
    // The stored amount is the original 1000, not the conflicting 5000.
    assert_eq!(h.ledger.post_calls(), 1);
}

#[tokio::test]
async fn unreachable_journal_yields_202_pending() {
    let h = setup();
    h.ledger.set_unreachable();

    let response = h
        .app
        .clone()
        .oneshot(post_transfer(transfer_body(
            Uuid::new_v4(),
            Uuid::new_v4(),
            5000,
            "pending-key",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "LEDGER_CALLED");
    let id = json["transfer_id"].as_str().unwrap().to_string();

    // GET reflects the pending durable state.
    let view = h
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/transfers/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(view.status(), StatusCode::OK);
    let view_json = body_json(view).await;
    assert_eq!(view_json["status"], "LEDGER_CALLED");
}

#[tokio::test]
async fn journal_rejection_surfaces_failed_transfer() {
    let h = setup();
    h.ledger.reject(400, "unbalanced entry");

    let response = h
        .app
        .oneshot(post_transfer(transfer_body(
            Uuid::new_v4(),
            Uuid::new_v4(),
            5000,
            "rejected-key",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["status"], "FAILED");
    assert!(json["error"].as_str().unwrap().contains("ledger_rejected"));
}

#[tokio::test]
async fn unknown_transfer_returns_404() {
    let h = setup();
    let response = h
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/transfers/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
