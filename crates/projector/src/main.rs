//! Projector service entry point.

use std::sync::Arc;

use projector::config::Config;
use projector::routes::accounts::AppState;
use projector::{EventConsumer, PostgresReadStore, Projector};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect to the database and run migrations
    let database_url = config
        .database_url
        .clone()
        .expect("DATABASE_URL is required");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    let store = PostgresReadStore::new(pool);
    store.run_migrations().await.expect("migrations failed");
    tracing::info!("connected to database");

    let projector = Projector::new(store);

    // 4. Start one consumer per topic
    let cancel = CancellationToken::new();

    let entry_config = config.entry_consumer().expect("KAFKA_BROKERS is required");
    let entry_consumer = EventConsumer::new(&entry_config, projector.clone())
        .expect("failed to create entry consumer");
    let entry_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { entry_consumer.run(cancel).await }
    });

    let transfer_config = config
        .transfer_consumer()
        .expect("KAFKA_BROKERS is required");
    let transfer_consumer = EventConsumer::new(&transfer_config, projector.clone())
        .expect("failed to create transfer consumer");
    let transfer_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { transfer_consumer.run(cancel).await }
    });

    // 5. Build and start the HTTP server
    let state = Arc::new(AppState { projector });
    let app = projector::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "projector listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 6. Stop background workers
    cancel.cancel();
    let _ = entry_task.await;
    let _ = transfer_task.await;

    tracing::info!("projector shut down gracefully");
}
