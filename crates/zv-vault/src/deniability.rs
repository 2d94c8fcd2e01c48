//! DeniabilityLayer: decoy filler records and dual-payload uploads.
//!
//! A decoy is a sibling record whose blob is random filler sized close to its
//! parent. A dual upload stores two independently encrypted envelopes as two
//! linked records. Either way the two records share one deletion lifetime:
//! burning or expiring one removes both.

use std::sync::Arc;
use zv_core::types::now_millis;
use zv_core::{FileRecord, VaultError, VaultResult};
use zv_crypto::RandomSource;
use zv_storage::BlobStore;

use crate::ids::{new_file_id, random_unit};
use crate::store::VaultMetadataStore;

pub struct DeniabilityLayer {
    store: Arc<VaultMetadataStore>,
    blobs: BlobStore,
    rng: Arc<dyn RandomSource>,
    decoy_min_bytes: u64,
    max_bytes: u64,
}

impl DeniabilityLayer {
    pub fn new(
        store: Arc<VaultMetadataStore>,
        blobs: BlobStore,
        rng: Arc<dyn RandomSource>,
        decoy_min_bytes: u64,
        max_bytes: u64,
    ) -> Self {
        Self {
            store,
            blobs,
            rng,
            decoy_min_bytes,
            max_bytes,
        }
    }

    /// Filler length for a parent of `parent_size` bytes: the parent size
    /// scaled by a random factor in `[0.5, 1.5)`, clamped to
    /// `[decoy_min_bytes, max_bytes]`.
    pub fn decoy_size(&self, parent_size: u64) -> u64 {
        let factor = 0.5 + random_unit(self.rng.as_ref());
        let scaled = (parent_size as f64 * factor) as u64;
        scaled
            .max(self.decoy_min_bytes)
            .min(self.max_bytes.max(self.decoy_min_bytes))
    }

    /// Generate a filler blob and link it to `parent_id` as its decoy.
    pub async fn attach_decoy(&self, parent_id: &str) -> VaultResult<FileRecord> {
        let parent = self.store.get(parent_id).await?;
        if parent.decoy_id.is_some() || parent.parent_id.is_some() {
            return Err(VaultError::Format(format!(
                "file {parent_id} is already part of a linked pair"
            )));
        }

        let size = self.decoy_size(parent.size);
        let mut filler = vec![0u8; size as usize];
        self.rng.fill_bytes(&mut filler);

        let decoy = FileRecord {
            file_id: new_file_id(self.rng.as_ref()),
            burn: parent.burn,
            created_at: now_millis(),
            expires_at: parent.expires_at,
            expiry_option: parent.expiry_option,
            size,
            is_decoy_part: true,
            parent_id: Some(parent_id.to_string()),
            ..Default::default()
        };

        self.blobs.put(&decoy.file_id, filler).await?;
        if let Err(e) = self.store.attach_decoy(parent_id, decoy.clone()).await {
            self.discard_blob(&decoy.file_id).await;
            return Err(e);
        }

        tracing::info!(file_id = %parent_id, decoy_id = %decoy.file_id, size, "decoy attached");
        Ok(decoy)
    }

    /// Store two envelopes as one linked pair. `primary` must be fully
    /// populated by the caller; the secondary record inherits its lifetime.
    ///
    /// Returns `(primary, secondary)` as stored.
    pub async fn store_dual(
        &self,
        mut primary: FileRecord,
        primary_bytes: Vec<u8>,
        secondary_bytes: Vec<u8>,
    ) -> VaultResult<(FileRecord, FileRecord)> {
        let secondary = FileRecord {
            file_id: new_file_id(self.rng.as_ref()),
            burn: primary.burn,
            created_at: primary.created_at,
            expires_at: primary.expires_at,
            expiry_option: primary.expiry_option,
            size: secondary_bytes.len() as u64,
            is_dual_mode: true,
            is_decoy_part: true,
            parent_id: Some(primary.file_id.clone()),
            ..Default::default()
        };
        primary.is_dual_mode = true;
        primary.has_decoy = true;
        primary.decoy_id = Some(secondary.file_id.clone());

        self.blobs.put(&primary.file_id, primary_bytes).await?;
        if let Err(e) = self.blobs.put(&secondary.file_id, secondary_bytes).await {
            self.discard_blob(&primary.file_id).await;
            return Err(e);
        }
        if let Err(e) = self
            .store
            .create_many(vec![primary.clone(), secondary.clone()])
            .await
        {
            self.discard_blob(&primary.file_id).await;
            self.discard_blob(&secondary.file_id).await;
            return Err(e);
        }

        tracing::info!(
            file_id = %primary.file_id,
            decoy_id = %secondary.file_id,
            "dual upload stored"
        );
        Ok((primary, secondary))
    }

    async fn discard_blob(&self, id: &str) {
        if let Err(e) = self.blobs.delete(id).await {
            tracing::warn!(file_id = %id, "failed to discard blob: {e}");
        }
    }
}
