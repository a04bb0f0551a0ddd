//! Integration tests for the projector query surface.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{events, AccountId, EntryId, EventId, TransferId};
use metrics_exporter_prometheus::PrometheusHandle;
use projector::routes::accounts::AppState;
use projector::{InMemoryReadStore, Projector};
use prost::Message;
use tower::ServiceExt;

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

fn setup() -> (axum::Router, Projector<InMemoryReadStore>) {
    let projector = Projector::new(InMemoryReadStore::new());
    let state = Arc::new(AppState {
        projector: projector.clone(),
    });
    (projector::create_app(state, get_metrics_handle()), projector)
}

async fn project_transfer_entry(
    projector: &Projector<InMemoryReadStore>,
    from: AccountId,
    to: AccountId,
    amount: i64,
) {
    let event = events::EntryPosted {
        entry_id: EntryId::new().to_string(),
        batch_id: TransferId::new().to_string(),
        lines: vec![
            events::EntryLine {
                account_id: from.to_string(),
                amount: Some(events::Money {
                    units: amount,
                    currency: "USD".to_string(),
                }),
                side: events::Side::Debit as i32,
            },
            events::EntryLine {
                account_id: to.to_string(),
                amount: Some(events::Money {
                    units: amount,
                    currency: "USD".to_string(),
                }),
                side: events::Side::Credit as i32,
            },
        ],
        ts_unix_ms: 1_700_000_000_000,
    };
    projector
        .handle(EventId::new(), "EntryPosted", &event.encode_to_vec())
        .await
        .unwrap();
}

async fn get(app: axum::Router, uri: String) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn balance_reflects_projected_entries() {
    let (app, projector) = setup();
    let (a, b) = (AccountId::new(), AccountId::new());
    project_transfer_entry(&projector, a, b, 5000).await;

    let (status, json) = get(app.clone(), format!("/v1/accounts/{a}/balance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["balance_minor"], -5000);
    assert_eq!(json["currency"], "USD");

    let (_, json) = get(app, format!("/v1/accounts/{b}/balance")).await;
    assert_eq!(json["balance_minor"], 5000);
}

#[tokio::test]
async fn unseen_account_answers_zero_balance() {
    let (app, _) = setup();
    let account = AccountId::new();

    let (status, json) = get(
        app,
        format!("/v1/accounts/{account}/balance?currency=EUR"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["balance_minor"], 0);
    assert_eq!(json["currency"], "EUR");
}

#[tokio::test]
async fn statements_list_projected_lines() {
    let (app, projector) = setup();
    let (a, b) = (AccountId::new(), AccountId::new());
    project_transfer_entry(&projector, a, b, 1200).await;
    project_transfer_entry(&projector, a, b, 800).await;

    let (status, json) = get(app, format!("/v1/accounts/{a}/statements")).await;
    assert_eq!(status, StatusCode::OK);
    let statements = json["statements"].as_array().unwrap();
    assert_eq!(statements.len(), 2);
    assert!(statements.iter().all(|s| s["side"] == "DEBIT"));
}

#[tokio::test]
async fn bad_account_id_is_rejected() {
    let (app, _) = setup();
    let (status, _) = get(app, "/v1/accounts/garbage/balance".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_time_bound_is_rejected() {
    let (app, _) = setup();
    let account = AccountId::new();
    let (status, _) = get(
        app,
        format!("/v1/accounts/{account}/statements?from=yesterday"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transfer_view_round_trips() {
    let (app, projector) = setup();
    let id = TransferId::new();

    let initiated = events::TransferInitiated {
        transfer_id: id.to_string(),
        from: AccountId::new().to_string(),
        to: AccountId::new().to_string(),
        amount: Some(events::Money {
            units: 5000,
            currency: "USD".to_string(),
        }),
        idem_key: "k".to_string(),
        ts_unix_ms: 1,
    };
    projector
        .handle(EventId::new(), "TransferInitiated", &initiated.encode_to_vec())
        .await
        .unwrap();

    let (status, json) = get(app.clone(), format!("/v1/transfers/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "INITIATED");
    assert_eq!(json["amount_minor"], 5000);

    let (status, _) = get(app, format!("/v1/transfers/{}", TransferId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
