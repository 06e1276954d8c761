use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::{services, state::AppState};
use crate::config::Config;
use crate::ledger::FjallStore;
use crate::pipeline::EnrichmentQueue;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How long workers get to finish the run they are in after shutdown
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/settings",
            get(services::get_settings)
                .put(services::update_settings)
                .post(services::update_settings),
        )
        .route(
            "/settings/{handler}",
            get(services::get_handler_settings)
                .put(services::update_handler_settings)
                .post(services::update_handler_settings),
        )
        .route("/util/list-handlers", get(services::list_handlers))
        .route("/util/list-feeds", get(services::list_feeds))
        .route("/util/list-feed-entries", get(services::list_feed_entries))
        .route("/read/{entry_id}", get(services::read_entry))
        .route("/about", get(services::about))
        .route("/onboarding", get(services::onboarding))
        .route("/feeds", post(services::create_feed))
        .route("/entries", post(services::ingest_entry))
        .route("/entries/{entry_id}/diagnostics", get(services::entry_diagnostics))
        .route("/health", get(services::health))
        .with_state(state)
        // Handles Content-Encoding of request bodies before they reach the services
        .layer(RequestDecompressionLayer::new())
}

pub async fn run(config: Config, address: SocketAddr) -> Result<(), AnyError> {
    info!(path = %config.ledger.path.display(), "Opening Fjall store");
    let store = Arc::new(
        FjallStore::open(&config.ledger.path)
            .map_err(|e| format!("Failed to open Fjall store: {}", e))?,
    );

    let (state, receivers) = AppState::new(config, store.clone())
        .map_err(|e| format!("Failed to initialize state: {}", e))?;
    let workers = EnrichmentQueue::spawn_workers(state.pipeline.clone(), receivers);

    let app = build_router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Gleaner API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last queue handle; workers drain and stop
    for worker in workers {
        if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker).await.is_err() {
            warn!("Enrichment worker did not stop in time");
        }
    }

    store.persist()?;
    info!("Ledger persisted, bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
