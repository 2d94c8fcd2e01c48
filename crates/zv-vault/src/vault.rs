//! The `Vault` facade: what request handlers call.
//!
//! Bytes are read before a download is claimed, and the claim (counter bump,
//! burn removal, token consumption) happens in one store critical section.
//! Two racing downloads of a burn-flagged file may both read the blob, but
//! only one claim succeeds, so only one response is ever served.
//!
//! A burn removes records immediately; blob deletion is handed back to the
//! caller as a [`BurnTicket`] so it can run after the response has been sent.

use serde::Serialize;
use std::sync::Arc;
use zv_core::config::VaultConfig;
use zv_core::types::now_millis;
use zv_core::{ExpiryOption, FileInfo, FileRecord, VaultError, VaultResult};
use zv_crypto::{OsRandom, RandomSource, IV_SIZE, TAG_SIZE};
use zv_storage::BlobStore;

use crate::deniability::DeniabilityLayer;
use crate::ids::{is_short_code, new_file_id};
use crate::store::{Claim, VaultMetadataStore};
use crate::tokens::{DisposableGrant, HealOutcome, TokenAuthority};

/// Smallest byte string that can be an envelope: IV plus tag.
pub const MIN_ENVELOPE_BYTES: usize = IV_SIZE + TAG_SIZE;

/// Options chosen by the uploader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub burn: bool,
    pub expiry: ExpiryOption,
    pub decoy: bool,
    /// SHA-256 of the plaintext, lowercase hex
    pub file_hash: Option<String>,
}

impl UploadOptions {
    /// Build options from raw query values. Flags are on for `true` or `1`.
    pub fn from_params(
        burn: Option<&str>,
        expiry: Option<&str>,
        decoy: Option<&str>,
        hash: Option<&str>,
    ) -> VaultResult<Self> {
        let expiry = match expiry.filter(|s| !s.is_empty()) {
            Some(raw) => raw.parse()?,
            None => ExpiryOption::default(),
        };
        let file_hash = hash
            .filter(|s| !s.is_empty())
            .map(validate_hash)
            .transpose()?;
        Ok(Self {
            burn: flag(burn),
            expiry,
            decoy: flag(decoy),
            file_hash,
        })
    }
}

fn flag(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("1"))
}

fn validate_hash(hash: &str) -> VaultResult<String> {
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(VaultError::Format(
            "file hash must be 64 hex characters (SHA-256)".into(),
        ));
    }
    Ok(hash.to_ascii_lowercase())
}

/// Returned to the uploader once. `filename` carries the file id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    #[serde(rename = "filename")]
    pub file_id: String,
    pub master_token: String,
    pub expires_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoy_id: Option<String>,
}

/// Blobs whose records were burned by a download, waiting for deletion.
#[derive(Debug)]
#[must_use = "burned blobs are only deleted by Vault::finish_burn"]
pub struct BurnTicket {
    ids: Vec<String>,
}

impl BurnTicket {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// A served download.
#[derive(Debug)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub record: FileRecord,
    pub burn: Option<BurnTicket>,
}

pub struct Vault {
    store: Arc<VaultMetadataStore>,
    blobs: BlobStore,
    tokens: TokenAuthority,
    deniability: DeniabilityLayer,
    rng: Arc<dyn RandomSource>,
    config: VaultConfig,
}

impl Vault {
    pub fn new(store: Arc<VaultMetadataStore>, blobs: BlobStore, config: VaultConfig) -> Self {
        Self::with_random(store, blobs, config, Arc::new(OsRandom))
    }

    pub fn with_random(
        store: Arc<VaultMetadataStore>,
        blobs: BlobStore,
        config: VaultConfig,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        let tokens = TokenAuthority::new(store.clone(), rng.clone(), config.disposable_ttl());
        let deniability = DeniabilityLayer::new(
            store.clone(),
            blobs.clone(),
            rng.clone(),
            config.decoy_min_bytes,
            config.max_upload_bytes,
        );
        Self {
            store,
            blobs,
            tokens,
            deniability,
            rng,
            config,
        }
    }

    pub fn store(&self) -> &Arc<VaultMetadataStore> {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn check_envelope(&self, bytes: &[u8]) -> VaultResult<()> {
        let size = bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(VaultError::TooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }
        if bytes.len() < MIN_ENVELOPE_BYTES {
            return Err(VaultError::Format(format!(
                "upload of {size} bytes is too short to be an envelope"
            )));
        }
        Ok(())
    }

    fn new_record(&self, size: usize, options: &UploadOptions) -> FileRecord {
        let now = now_millis();
        FileRecord {
            file_id: new_file_id(self.rng.as_ref()),
            burn: options.burn,
            created_at: now,
            expires_at: now + options.expiry.duration().as_millis() as u64,
            expiry_option: options.expiry,
            size: size as u64,
            master_token: self.tokens.issue_master_token(),
            file_hash: options.file_hash.clone(),
            ..Default::default()
        }
    }

    /// Store one envelope. With `options.decoy` a filler sibling is attached;
    /// if that fails the upload is rolled back.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> VaultResult<UploadReceipt> {
        self.check_envelope(&bytes)?;
        let record = self.new_record(bytes.len(), &options);
        let id = record.file_id.clone();

        self.blobs.put(&id, bytes).await?;
        if let Err(e) = self.store.create(record.clone()).await {
            self.discard_blobs(&[id]).await;
            return Err(e);
        }

        let decoy_id = if options.decoy {
            match self.deniability.attach_decoy(&id).await {
                Ok(decoy) => Some(decoy.file_id),
                Err(e) => {
                    if let Ok(removed) = self.store.delete(&id).await {
                        let ids: Vec<String> = removed.into_iter().map(|r| r.file_id).collect();
                        self.discard_blobs(&ids).await;
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        tracing::info!(
            file_id = %id,
            size = record.size,
            burn = record.burn,
            expiry = %record.expiry_option,
            decoy = decoy_id.is_some(),
            "upload stored"
        );
        Ok(UploadReceipt {
            file_id: id,
            master_token: record.master_token,
            expires_at: record.expires_at,
            decoy_id,
        })
    }

    /// Store two independently encrypted envelopes as a linked pair.
    /// `options.decoy` is ignored; the second envelope is the decoy.
    pub async fn upload_dual(
        &self,
        bytes: Vec<u8>,
        decoy_bytes: Vec<u8>,
        options: UploadOptions,
    ) -> VaultResult<UploadReceipt> {
        self.check_envelope(&bytes)?;
        self.check_envelope(&decoy_bytes)?;

        let primary = self.new_record(bytes.len(), &options);
        let (primary, secondary) = self
            .deniability
            .store_dual(primary, bytes, decoy_bytes)
            .await?;

        Ok(UploadReceipt {
            file_id: primary.file_id,
            master_token: primary.master_token,
            expires_at: primary.expires_at,
            decoy_id: Some(secondary.file_id),
        })
    }

    /// Serve a file and count the download.
    pub async fn download(&self, id: &str) -> VaultResult<Download> {
        let lazy = self.config.lazy_expiry;
        let record = self.store.get(id).await?;
        if lazy && record.is_expired(now_millis()) {
            return Err(VaultError::Gone(format!("file {id} has expired")));
        }

        let bytes = self.blobs.read(id).await?;

        let claim = {
            let mut state = self.store.lock().await;
            let claim = state.claim_download(id, now_millis(), lazy)?;
            state.commit();
            claim
        };
        Ok(self.served(bytes, claim))
    }

    /// Public metadata for a file.
    pub async fn info(&self, id: &str) -> VaultResult<FileInfo> {
        let record = self.store.get(id).await?;
        if self.config.lazy_expiry && record.is_expired(now_millis()) {
            return Err(VaultError::Gone(format!("file {id} has expired")));
        }
        Ok(record.info())
    }

    /// Resolve an 8-character short code to the one live file id it
    /// prefixes.
    pub async fn resolve_short_code(&self, code: &str) -> VaultResult<String> {
        if !is_short_code(code) {
            return Err(VaultError::Format(
                "short code must be 8 lowercase hex characters".into(),
            ));
        }
        let live_at = self.config.lazy_expiry.then(now_millis);
        let mut matches = self.store.find_by_prefix(code, live_at).await;
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(VaultError::NotFound(format!("short code {code}"))),
            n => {
                tracing::warn!(code = %code, matches = n, "ambiguous short code");
                Err(VaultError::NotFound(format!("short code {code}")))
            }
        }
    }

    pub async fn heal_link(&self, id: &str, master_token: &str) -> VaultResult<HealOutcome> {
        self.tokens.heal_link(id, master_token).await
    }

    pub async fn issue_disposable(
        &self,
        id: &str,
        master_token: &str,
    ) -> VaultResult<DisposableGrant> {
        self.tokens.issue_disposable(id, master_token).await
    }

    /// Serve a file through a disposable token, consuming the token.
    pub async fn redeem_disposable(&self, token: &str) -> VaultResult<Download> {
        let file_id = self.tokens.peek_disposable(token).await?;
        let bytes = self.blobs.read(&file_id).await?;
        let claim = self.tokens.redeem_disposable(token).await?;
        Ok(self.served(bytes, claim))
    }

    /// Delete the blobs of a burned download. Call once the response has
    /// been delivered.
    pub async fn finish_burn(&self, ticket: BurnTicket) {
        self.discard_blobs(&ticket.ids).await;
        tracing::info!(files = ?ticket.ids, "burned blobs deleted");
    }

    fn served(&self, bytes: Vec<u8>, claim: Claim) -> Download {
        let burn = if claim.burned.is_empty() {
            None
        } else {
            tracing::info!(file_id = %claim.record.file_id, "burn after read");
            Some(BurnTicket { ids: claim.burned })
        };
        Download {
            bytes,
            record: claim.record,
            burn,
        }
    }

    async fn discard_blobs(&self, ids: &[String]) {
        for id in ids {
            if let Err(e) = self.blobs.delete(id).await {
                // left for the orphan sweep
                tracing::warn!(file_id = %id, "blob delete failed: {e}");
            }
        }
    }
}
