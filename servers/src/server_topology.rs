//! # Topology Telemetry Server
//!
//! Collects interface and IS-IS neighbor telemetry from the configured
//! devices, keeps the current state in the configured store, and serves the
//! derived topology to viewers over HTTP and websockets.
//!
//! ## Endpoints:
//! - `GET /health`
//! - `GET /api/topology`: current snapshot
//! - `GET /ws/topology`: snapshot on connect, then one per change
//! - `GET|POST /api/device`, `DELETE /api/device/{name}`: device lifecycle

#![forbid(unsafe_code)]

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod topology_logic;
use topology_logic::state::{AnyStore, AppState, TopologyHub, TopologySupervisor};
use topology_logic::{config, downstream, logger};

use lib_topology::core::events;
use lib_topology::store::{MemoryStore, PostgresStore};
use lib_topology::transport::WsRelayTransport;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Rustls 0.23+ requires an explicit crypto provider to be installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_config();
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    let store = match &settings.database_url {
        Some(url) => AnyStore::Postgres(
            PostgresStore::connect(url, settings.db_max_connections)
                .await
                .map_err(|e| anyhow::anyhow!("State store error: {}", e))?,
        ),
        None => AnyStore::Memory(MemoryStore::new()),
    };
    tracing::info!(backend = store.backend(), "state store ready");
    let store = Arc::new(store);

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = events::channel(settings.event_capacity);

    let hub = Arc::new(TopologyHub::new(Arc::clone(&store)));
    let transport = Arc::new(WsRelayTransport::new().with_path_prefix(settings.relay_path_prefix.clone()));
    let supervisor = Arc::new(TopologySupervisor::new(
        Arc::clone(&store),
        transport,
        events_tx,
        shutdown.child_token(),
        settings.reap_interval,
    ));

    let hub_handle = {
        let hub = Arc::clone(&hub);
        let token = shutdown.clone();
        tokio::spawn(async move { hub.run(events_rx, token).await })
    };

    for device in config::load_devices(&settings.devices_file)? {
        let name = device.name.clone();
        if let Err(e) = supervisor.start(device).await {
            tracing::error!(device = %name, error = %e, "failed to start device");
        }
    }

    let app_state = AppState::new(Arc::clone(&store), Arc::clone(&hub), Arc::clone(&supervisor));
    let mut server_handle = tokio::spawn(downstream::run(settings.clone(), app_state, shutdown.clone()));

    let server_result = tokio::select! {
        _ = shutdown_signal() => None,
        res = &mut server_handle => Some(res),
    };

    shutdown.cancel();
    let server_result = match server_result {
        Some(res) => res,
        None => server_handle.await,
    };
    match server_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Downstream server failed: {}", e),
        Err(e) => tracing::error!("Downstream server task panicked: {}", e),
    }

    supervisor.shutdown().await;
    if let Err(e) = hub_handle.await {
        tracing::warn!("Hub task did not finish cleanly: {}", e);
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => tracing::info!("SIGTERM received, initiating shutdown."),
    }
}
