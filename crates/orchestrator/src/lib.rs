//! Orchestrator service: accepts transfer requests, drives the saga across
//! its own store and the journal service, and recovers stranded sagas.
//!
//! The saga is synchronous inside the request so the journal's entry id can
//! be stored on the transfer in the success path; everything downstream of
//! the outbox is asynchronous.

pub mod compensator;
pub mod config;
pub mod error;
pub mod events;
pub mod idem;
pub mod ledger;
pub mod resilience;
pub mod routes;
pub mod saga;
pub mod store;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use compensator::{Compensator, CompensatorConfig};
pub use error::{ApiError, OrchestratorError, Result};
pub use idem::{IdemGuard, InMemoryGuard, RedisGuard};
pub use ledger::{HttpLedgerGateway, InMemoryLedger, LedgerError, LedgerGateway};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
pub use saga::{CreateTransfer, SagaExecutor};
pub use store::{InMemoryTransferStore, PostgresTransferStore, TransferStore};

use routes::transfers::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, L, G>(state: Arc<AppState<S, L, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: TransferStore + 'static,
    L: LedgerGateway + 'static,
    G: IdemGuard + 'static,
{
    Router::new()
        .route("/healthz", get(common::http::health))
        .route("/v1/transfers", post(routes::transfers::create::<S, L, G>))
        .route("/v1/transfers/{id}", get(routes::transfers::get::<S, L, G>))
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
