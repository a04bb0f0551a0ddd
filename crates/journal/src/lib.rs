//! Journal service: appends balanced double-entry records and publishes
//! `EntryPosted` events through its own transactional outbox.
//!
//! The journal is the authoritative side of the transfer saga. Posting is
//! idempotent on batch id, which is what lets the orchestrator retry an
//! ambiguous call and the compensator reconcile against
//! `GET /v1/entries/by-batch/{batch_id}`.

pub mod config;
pub mod error;
pub mod routes;
pub mod service;
pub mod store;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{JournalError, Result};
pub use service::{JournalService, PostedEntry};
pub use store::{BatchLookup, InMemoryJournalStore, JournalStore, PostgresJournalStore};

use routes::entries::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: JournalStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/healthz", get(common::http::health))
        .route("/v1/entries", post(routes::entries::create::<S>))
        .route(
            "/v1/entries/by-batch/{batch_id}",
            get(routes::entries::get_by_batch::<S>),
        )
        .route(
            "/v1/entries/{entry_id}/void",
            post(routes::entries::void::<S>),
        )
        .with_state(state)
        .merge(common::http::metrics_router(metrics_handle))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
