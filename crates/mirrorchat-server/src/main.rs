//! # mirrorchat-server
//!
//! One node of the replicated chat service.
//!
//! This binary provides:
//! - **REST API** (axum) for users, channels, messages and read positions
//! - **Replication receiver** (`/sync/*`) applying writes broadcast by peers
//! - **Snapshot writer** (designated node only) persisting the whole store
//! - **Coordinator endpoints** (`/coord/*`, optional) hosting the shared ID
//!   counter and snapshot blobs for the rest of the cluster

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mirrorchat_server::api::{self, AppState};
use mirrorchat_server::config::NodeConfig;
use mirrorchat_server::coord::{coord_router, CoordState};
use mirrorchat_server::counter::{CounterService, FileCounter, HttpCounter};
use mirrorchat_server::durable::{DurableStore, FileDurableStore, HttpDurableStore};
use mirrorchat_server::persistence;
use mirrorchat_server::replication::{Broadcaster, HttpBroadcaster, NoopBroadcaster};
use mirrorchat_server::service::ChatService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,mirrorchat_server=debug,mirrorchat_store=debug")
        }))
        .init();

    info!("Starting mirrorchat node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");
    if let Err(reason) = config.validate() {
        error!(%reason, "Refusing to start");
        anyhow::bail!(reason);
    }

    // -----------------------------------------------------------------------
    // 3. Shared counter and durable store
    // -----------------------------------------------------------------------
    let (counter, durable): (Arc<dyn CounterService>, Arc<dyn DurableStore>) =
        match &config.coordinator_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(config.coordinator_timeout)
                    .build()?;
                info!(coordinator = %url, "Using remote counter and durable store");
                (
                    Arc::new(HttpCounter::new(client.clone(), url.clone())),
                    Arc::new(HttpDurableStore::new(client, url.clone())),
                )
            }
            None => (
                Arc::new(FileCounter::new(config.data_dir.join("counters")).await?),
                Arc::new(FileDurableStore::new(config.data_dir.join("snapshots")).await?),
            ),
        };

    // -----------------------------------------------------------------------
    // 4. Restore state (nothing is served before this succeeds)
    // -----------------------------------------------------------------------
    if config.snapshot_writer && config.seed_empty_snapshot {
        persistence::seed_empty_if_absent(durable.as_ref()).await?;
    }

    let store = match persistence::restore_all(durable.as_ref()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to restore snapshot, refusing to start");
            return Err(e).context("restoring snapshot");
        }
    };

    // -----------------------------------------------------------------------
    // 5. Replication and application service
    // -----------------------------------------------------------------------
    let broadcaster: Arc<dyn Broadcaster> = if config.peers.is_empty() {
        info!("No peers configured, replication disabled");
        Arc::new(NoopBroadcaster)
    } else {
        let http = HttpBroadcaster::new(config.peers.clone(), config.broadcast_timeout)?;
        info!(peers = ?http.peers(), "Broadcasting writes to peers");
        Arc::new(http)
    };

    let service = Arc::new(ChatService::new(store.clone(), counter.clone(), broadcaster));

    if config.snapshot_writer {
        persistence::spawn_snapshot_loop(store.clone(), durable.clone(), config.snapshot_interval);
        info!(
            interval_secs = config.snapshot_interval.as_secs(),
            "Periodic snapshot writer enabled"
        );
    }

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let mut app = api::build_router(AppState {
        service,
        config: Arc::new(config.clone()),
    });
    if config.serve_coordinator {
        app = app.merge(coord_router(CoordState {
            counter,
            blobs: durable.clone(),
        }));
        info!("Serving coordinator endpoints");
    }

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;

    tokio::select! {
        result = api::serve(app, listener) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    if config.snapshot_writer {
        persistence::snapshot_all(&store, durable.as_ref()).await?;
        info!("Final snapshot written");
    }

    Ok(())
}
