//! TokenAuthority: master tokens, link healing, and single-use download tokens.
//!
//! Possession of a master token authorizes management of one record. Healing
//! swaps the token and bumps `linkVersion` in one critical section; the old
//! token stops working at once.
//!
//! Disposable tokens carry their own expiry, independent of the file. A
//! redemption needs both the token and the file to be live, and flips `used`
//! in the same critical section that counts the download.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use zv_core::types::now_millis;
use zv_core::{DisposableToken, FileRecord, VaultError, VaultResult};
use zv_crypto::RandomSource;

use crate::ids::{random_hex, DISPOSABLE_TOKEN_BYTES, MASTER_TOKEN_BYTES};
use crate::store::{Claim, VaultMetadataStore};

/// Result of a successful heal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealOutcome {
    pub master_token: String,
    pub link_version: u32,
}

/// A freshly issued disposable token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposableGrant {
    pub token: String,
    pub file_id: String,
    /// Unix milliseconds
    pub expires_at: u64,
    pub ttl_secs: u64,
}

pub struct TokenAuthority {
    store: Arc<VaultMetadataStore>,
    rng: Arc<dyn RandomSource>,
    disposable_ttl: Duration,
}

impl TokenAuthority {
    pub fn new(
        store: Arc<VaultMetadataStore>,
        rng: Arc<dyn RandomSource>,
        disposable_ttl: Duration,
    ) -> Self {
        Self {
            store,
            rng,
            disposable_ttl,
        }
    }

    /// Fresh master token, returned to the uploader once.
    pub fn issue_master_token(&self) -> String {
        random_hex(self.rng.as_ref(), MASTER_TOKEN_BYTES)
    }

    /// Replace the master token of `file_id`. The presented token must be the
    /// current one.
    pub async fn heal_link(&self, file_id: &str, presented: &str) -> VaultResult<HealOutcome> {
        let new_token = self.issue_master_token();

        let mut state = self.store.lock().await;
        authorize(state.record(file_id)?, presented, now_millis())?;
        let link_version = state.update_healing(file_id, new_token.clone())?;
        state.commit();
        drop(state);

        tracing::info!(file_id = %file_id, link_version, "link healed");
        Ok(HealOutcome {
            master_token: new_token,
            link_version,
        })
    }

    /// Issue a single-use download token for `file_id`.
    pub async fn issue_disposable(
        &self,
        file_id: &str,
        presented: &str,
    ) -> VaultResult<DisposableGrant> {
        let token = random_hex(self.rng.as_ref(), DISPOSABLE_TOKEN_BYTES);
        let now = now_millis();
        let expires_at = now + self.disposable_ttl.as_millis() as u64;

        let mut state = self.store.lock().await;
        authorize(state.record(file_id)?, presented, now)?;
        state.insert_token(DisposableToken {
            token: token.clone(),
            file_id: file_id.to_string(),
            created_at: now,
            used: false,
            expires_at,
        });
        state.commit();
        drop(state);

        tracing::info!(file_id = %file_id, ttl_secs = self.disposable_ttl.as_secs(), "disposable token issued");
        Ok(DisposableGrant {
            token,
            file_id: file_id.to_string(),
            expires_at,
            ttl_secs: self.disposable_ttl.as_secs(),
        })
    }

    /// Look up the file a token points at without consuming it. Answers the
    /// same errors a redemption would for the token itself.
    pub async fn peek_disposable(&self, token: &str) -> VaultResult<String> {
        let state = self.store.lock().await;
        let entry = state.token(token)?;
        check_usable(entry, now_millis())?;
        Ok(entry.file_id.clone())
    }

    /// Consume a disposable token and count the download, atomically.
    ///
    /// Unknown token: `NotFound`. Used or expired token, or expired file:
    /// `Gone`. A token whose file no longer exists answers `NotFound` and is
    /// left unconsumed.
    pub async fn redeem_disposable(&self, token: &str) -> VaultResult<Claim> {
        let now = now_millis();
        let mut state = self.store.lock().await;

        let entry = state.token(token)?;
        check_usable(entry, now)?;
        let file_id = entry.file_id.clone();

        let claim = state.claim_download(&file_id, now, true)?;
        state.token_mut(token)?.used = true;
        state.commit();
        drop(state);

        tracing::info!(file_id = %file_id, burned = !claim.burned.is_empty(), "disposable token redeemed");
        Ok(claim)
    }
}

fn check_usable(entry: &DisposableToken, now_ms: u64) -> VaultResult<()> {
    if entry.used {
        return Err(VaultError::Gone("disposable token already used".into()));
    }
    if entry.is_expired(now_ms) {
        return Err(VaultError::Gone("disposable token expired".into()));
    }
    Ok(())
}

/// Management calls need the live record's current master token.
fn authorize(record: &FileRecord, presented: &str, now_ms: u64) -> VaultResult<()> {
    if record.master_token.is_empty()
        || !constant_time_eq(record.master_token.as_bytes(), presented.as_bytes())
    {
        return Err(VaultError::Forbidden("master token does not match".into()));
    }
    if record.is_expired(now_ms) {
        return Err(VaultError::Gone(format!("file {} has expired", record.file_id)));
    }
    Ok(())
}

/// Compares every byte regardless of where the first difference is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
