//! Journal service entry point.

use std::sync::Arc;

use journal::config::Config;
use journal::routes::entries::AppState;
use journal::{JournalService, PostgresJournalStore};
use outbox::{KafkaPublisher, PostgresOutboxStore, Relay};
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

    let store = PostgresJournalStore::new(pool.clone());
    store.run_migrations().await.expect("migrations failed");
    tracing::info!("connected to database");

    // 4. Start the outbox relay
    let kafka = config.kafka().expect("KAFKA_BROKERS is required");
    let publisher = KafkaPublisher::new(&kafka).expect("failed to create Kafka publisher");
    let relay = Relay::new(
        PostgresOutboxStore::new(pool.clone()),
        publisher,
        config.relay(),
    );
    let cancel = CancellationToken::new();
    let relay_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { relay.run(cancel).await }
    });

    // 5. Build and start the HTTP server
    let state = Arc::new(AppState {
        service: JournalService::new(store),
    });
    let app = journal::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "journal listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 6. Stop background workers
    cancel.cancel();
    let _ = relay_task.await;

    tracing::info!("journal shut down gracefully");
}
