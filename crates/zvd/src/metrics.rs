//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  Liveness probe (always 200 if process is running)
//!   GET /readyz   Readiness probe (200 if the storage root is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;
use zv_storage::BlobStore;
use zv_vault::{SweepReport, VaultMetadataStore};

/// Daemon counters, registered under the `zv_` prefix.
pub struct Metrics {
    registry: Registry,
    pub uploads: Counter,
    pub dual_uploads: Counter,
    pub downloads: Counter,
    pub burns: Counter,
    pub heals: Counter,
    pub disposable_issued: Counter,
    pub disposable_redeemed: Counter,
    sweep_expired: Counter,
    sweep_orphans: Counter,
    sweep_tokens: Counter,
    sweep_failures: Counter,
    files_stored: Gauge,
    tokens_stored: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("zv");

        let uploads = counter(&mut registry, "uploads", "Envelopes stored");
        let dual_uploads = counter(&mut registry, "dual_uploads", "Dual envelope pairs stored");
        let downloads = counter(&mut registry, "downloads", "Downloads served");
        let burns = counter(&mut registry, "burns", "Files burned after a download");
        let heals = counter(&mut registry, "heals", "Links healed");
        let disposable_issued = counter(
            &mut registry,
            "disposable_issued",
            "Disposable download tokens issued",
        );
        let disposable_redeemed = counter(
            &mut registry,
            "disposable_redeemed",
            "Disposable download tokens redeemed",
        );
        let sweep_expired = counter(
            &mut registry,
            "sweep_expired",
            "Records reclaimed by expiry",
        );
        let sweep_orphans = counter(&mut registry, "sweep_orphans", "Orphaned blobs deleted");
        let sweep_tokens = counter(
            &mut registry,
            "sweep_tokens",
            "Expired disposable tokens purged",
        );
        let sweep_failures = counter(
            &mut registry,
            "sweep_failures",
            "Sweep steps left for the next cycle",
        );

        let files_stored = Gauge::default();
        registry.register("files_stored", "Records in the store", files_stored.clone());
        let tokens_stored = Gauge::default();
        registry.register(
            "tokens_stored",
            "Disposable tokens in the store",
            tokens_stored.clone(),
        );

        Self {
            registry,
            uploads,
            dual_uploads,
            downloads,
            burns,
            heals,
            disposable_issued,
            disposable_redeemed,
            sweep_expired,
            sweep_orphans,
            sweep_tokens,
            sweep_failures,
            files_stored,
            tokens_stored,
        }
    }

    pub fn record_sweep(&self, report: &SweepReport) {
        self.sweep_expired.inc_by(report.expired as u64);
        self.sweep_orphans.inc_by(report.orphans as u64);
        self.sweep_tokens.inc_by(report.tokens as u64);
        self.sweep_failures.inc_by(report.failures as u64);
    }

    /// Prometheus text exposition, with store gauges refreshed first.
    pub async fn render(&self, store: &VaultMetadataStore) -> Result<String> {
        let counts = store.counts().await;
        self.files_stored.set(counts.files as i64);
        self.tokens_stored.set(counts.tokens as i64);

        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &mut Registry, name: &str, help: &str) -> Counter {
    let counter = Counter::default();
    registry.register(name, help, counter.clone());
    counter
}

/// Shared state for the metrics listener
#[derive(Clone)]
pub struct HealthState {
    pub metrics: Arc<Metrics>,
    pub store: Arc<VaultMetadataStore>,
    pub blobs: BlobStore,
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.metrics.render(&state.store).await {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if the blob root is reachable, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match zv_storage::check_health(state.blobs.operator()).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("readiness: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable")
        }
    }
}
