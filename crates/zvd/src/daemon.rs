//! Daemon lifecycle: startup, health checks, systemd notify, HTTP server,
//! retention sweeper, graceful shutdown

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use zv_core::config::ZvConfig;
use zv_storage::{build_fs_operator, check_health, BlobStore};
use zv_vault::{RetentionSweeper, Vault, VaultMetadataStore};

use crate::http::{self, AppState};
use crate::metrics::{self, HealthState, Metrics};

/// Shortest sweep interval accepted from config.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(config: ZvConfig) -> Result<()> {
    info!("daemon starting");

    // ── Storage root ─────────────────────────────────────────────────────
    let root = &config.storage.root;
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("creating storage root {}", root.display()))?;

    let operator = build_fs_operator(root)?;
    match check_health(&operator).await {
        Ok(()) => info!(root = %root.display(), "storage: ready"),
        Err(e) => warn!(root = %root.display(), "storage: {e}"),
    }

    let metadata_path = config.storage.metadata_path();
    let store = Arc::new(
        VaultMetadataStore::open(&metadata_path)
            .with_context(|| format!("opening record store {}", metadata_path.display()))?,
    );
    let counts = store.counts().await;
    info!(
        path = %metadata_path.display(),
        files = counts.files,
        tokens = counts.tokens,
        "record store loaded"
    );

    let blobs = BlobStore::new(operator, &config.storage.uploads_dir);
    let vault = Arc::new(Vault::new(
        store.clone(),
        blobs.clone(),
        config.vault.clone(),
    ));
    let metrics = Arc::new(Metrics::new());

    // ── Retention sweeper ────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = RetentionSweeper::new(
        store.clone(),
        blobs.clone(),
        config.retention.orphan_threshold(),
    );
    let interval = config.retention.sweep_interval().max(MIN_SWEEP_INTERVAL);
    let sweep_metrics = metrics.clone();
    let sweeper_task = tokio::spawn(sweeper.run(interval, shutdown_rx, move |report| {
        sweep_metrics.record_sweep(report)
    }));

    // ── Metrics endpoint ─────────────────────────────────────────────────
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let health = HealthState {
            metrics: metrics.clone(),
            store: store.clone(),
            blobs: blobs.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, health).await {
                error!("metrics server: {e}");
            }
        });
    }

    // ── HTTP surface ─────────────────────────────────────────────────────
    let app = http::router(AppState {
        vault,
        metrics,
        burn_delete_delay: config.retention.burn_delete_delay(),
    });
    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    };

    notify_ready();
    info!(addr = %config.daemon.listen, "http: listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server")?;

    // ── Drain ────────────────────────────────────────────────────────────
    info!("draining");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        warn!("sweeper task: {e}");
    }
    store.flush().await.context("flushing record store")?;

    info!("daemon stopped");
    Ok(())
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
