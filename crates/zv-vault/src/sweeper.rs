//! RetentionSweeper: periodic reclamation of expired and orphaned data.
//!
//! Each cycle runs three passes:
//!   1. records past `expiresAt`: blobs first, then metadata (with linked records)
//!   2. blobs with no record, once orphaned for longer than the threshold
//!   3. disposable tokens past their own expiry
//!
//! Each mutation takes the store lock for one record at a time, so request
//! handlers interleave freely with a running sweep. A failure on one record
//! is logged and the pass moves on; the record is retried next cycle.
//!
//! Orphan age counts from the first cycle that saw the blob without a record.
//! After a restart the count starts over.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use zv_core::types::now_millis;
use zv_core::VaultError;
use zv_storage::BlobStore;

use crate::store::VaultMetadataStore;

/// Counts from one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Records removed by expiry, linked records included
    pub expired: usize,
    /// Orphaned blobs deleted
    pub orphans: usize,
    /// Disposable tokens purged
    pub tokens: usize,
    /// Records or blobs left for the next cycle after an error
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct RetentionSweeper {
    store: Arc<VaultMetadataStore>,
    blobs: BlobStore,
    orphan_threshold: Duration,
    /// blob id → first cycle that saw it without a record
    first_seen: HashMap<String, Instant>,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<VaultMetadataStore>,
        blobs: BlobStore,
        orphan_threshold: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            orphan_threshold,
            first_seen: HashMap::new(),
        }
    }

    /// Number of orphaned blobs being aged.
    pub fn tracked_orphans(&self) -> usize {
        self.first_seen.len()
    }

    /// Run all three passes once.
    pub async fn sweep_once(&mut self) -> SweepReport {
        let now = now_millis();
        let mut report = SweepReport::default();

        self.sweep_expired(now, &mut report).await;
        self.sweep_orphans(&mut report).await;
        report.tokens = self.store.purge_expired_tokens(now).await;

        if report.is_empty() {
            tracing::debug!("sweep: nothing to reclaim");
        } else {
            tracing::info!(
                expired = report.expired,
                orphans = report.orphans,
                tokens = report.tokens,
                failures = report.failures,
                "sweep complete"
            );
        }
        report
    }

    async fn sweep_expired(&mut self, now_ms: u64, report: &mut SweepReport) {
        for id in self.store.expired_ids(now_ms).await {
            let record = match self.store.get(&id).await {
                Ok(record) => record,
                // already removed together with a linked record
                Err(VaultError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::warn!(file_id = %id, "sweep: reading record failed: {e}");
                    report.failures += 1;
                    continue;
                }
            };

            let mut blob_ids = vec![record.file_id.clone()];
            blob_ids.extend(record.linked_ids().map(str::to_string));

            let mut blobs_gone = true;
            for blob_id in &blob_ids {
                if let Err(e) = self.blobs.delete(blob_id).await {
                    tracing::warn!(file_id = %blob_id, "sweep: deleting expired blob failed: {e}");
                    blobs_gone = false;
                }
            }
            if !blobs_gone {
                report.failures += 1;
                continue;
            }

            match self.store.delete(&id).await {
                Ok(removed) => {
                    tracing::info!(file_id = %id, records = removed.len(), "sweep: expired");
                    report.expired += removed.len();
                }
                Err(VaultError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(file_id = %id, "sweep: deleting expired record failed: {e}");
                    report.failures += 1;
                }
            }
        }
    }

    async fn sweep_orphans(&mut self, report: &mut SweepReport) {
        let listed = match self.blobs.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("sweep: listing blobs failed: {e}");
                report.failures += 1;
                return;
            }
        };
        let known = self.store.record_ids().await;

        let listed_set: HashSet<&str> = listed.iter().map(String::as_str).collect();
        self.first_seen
            .retain(|id, _| listed_set.contains(id.as_str()) && !known.contains(id));

        for id in &listed {
            if known.contains(id) {
                continue;
            }
            let first_seen = *self
                .first_seen
                .entry(id.clone())
                .or_insert_with(Instant::now);
            if first_seen.elapsed() < self.orphan_threshold {
                continue;
            }
            // an upload may have created the record since the snapshot
            if self.store.contains(id).await {
                self.first_seen.remove(id);
                continue;
            }

            match self.blobs.delete(id).await {
                Ok(()) => {
                    tracing::info!(file_id = %id, "sweep: orphan deleted");
                    self.first_seen.remove(id);
                    report.orphans += 1;
                }
                Err(e) => {
                    tracing::warn!(file_id = %id, "sweep: deleting orphan failed: {e}");
                    report.failures += 1;
                }
            }
        }
    }

    /// Sweep every `interval` until `shutdown` turns true. `on_report`
    /// receives each cycle's counts.
    pub async fn run<F>(
        mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: F,
    ) where
        F: FnMut(&SweepReport) + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "retention sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    on_report(&report);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("retention sweeper stopping");
                        break;
                    }
                }
            }
        }
    }
}
