//! Projector service: consumes the event bus and folds entry and transfer
//! events into a denormalized read model (balances, statements, transfer
//! view), deduplicating by event id.

pub mod config;
pub mod consumer;
pub mod error;
pub mod projection;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use consumer::{ConsumerConfig, ConsumerSasl, EventConsumer};
pub use error::{ProjectorError, Result};
pub use projection::Projector;
pub use store::{InMemoryReadStore, PostgresReadStore, ReadStore};

use routes::accounts::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R: ReadStore + 'static>(
    state: Arc<AppState<R>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/healthz", get(common::http::health))
        .route(
            "/v1/accounts/{id}/balance",
            get(routes::accounts::balance::<R>),
        )
        .route(
            "/v1/accounts/{id}/statements",
            get(routes::accounts::statements::<R>),
        )
        .route("/v1/transfers/{id}", get(routes::accounts::transfer::<R>))
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
