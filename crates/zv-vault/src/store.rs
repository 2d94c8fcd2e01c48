//! VaultMetadataStore: durable fileId → FileRecord map plus disposable tokens.
//!
//! The whole store is one JSON document, loaded at startup and rewritten
//! atomically (write temp, then rename) on every mutation. All access goes
//! through a single async mutex, so every mutation is a critical section and
//! readers always see a consistent snapshot.
//!
//! A failed flush is logged and the store stays dirty; the next mutation
//! writes the full document again, carrying the earlier change with it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};
use zv_core::{DisposableToken, FileRecord, VaultError, VaultResult};

/// On-disk document version.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StoreDocument {
    version: u32,
    files: BTreeMap<String, FileRecord>,
    disposable_tokens: BTreeMap<String, DisposableToken>,
}

/// Outcome of a successful download claim.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Record state after the download was counted
    pub record: FileRecord,
    /// Blob ids whose records were removed by a burn; empty otherwise
    pub burned: Vec<String>,
}

/// Record and token counts, for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub files: usize,
    pub tokens: usize,
}

/// Locked view of the store. Obtained from [`VaultMetadataStore::lock`];
/// callers that mutate must finish with [`StoreState::commit`].
pub struct StoreState {
    path: PathBuf,
    doc: StoreDocument,
    dirty: bool,
}

impl StoreState {
    pub fn record(&self, id: &str) -> VaultResult<&FileRecord> {
        self.doc
            .files
            .get(id)
            .ok_or_else(|| VaultError::NotFound(format!("file {id}")))
    }

    pub fn record_mut(&mut self, id: &str) -> VaultResult<&mut FileRecord> {
        self.doc
            .files
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(format!("file {id}")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.doc.files.contains_key(id)
    }

    pub fn insert_record(&mut self, record: FileRecord) -> VaultResult<()> {
        if self.doc.files.contains_key(&record.file_id) {
            return Err(VaultError::Other(anyhow::anyhow!(
                "file id {} already in use",
                record.file_id
            )));
        }
        self.doc.files.insert(record.file_id.clone(), record);
        Ok(())
    }

    /// Remove a record and every record linked to it through
    /// `decoyId`/`parentId`, in either direction.
    pub fn remove_with_linked(&mut self, id: &str) -> Vec<FileRecord> {
        let mut removed = Vec::new();
        let mut pending = vec![id.to_string()];
        while let Some(next) = pending.pop() {
            if let Some(record) = self.doc.files.remove(&next) {
                pending.extend(record.linked_ids().map(str::to_string));
                removed.push(record);
            }
        }
        removed
    }

    pub fn increment_downloads(&mut self, id: &str) -> VaultResult<&FileRecord> {
        let record = self.record_mut(id)?;
        record.downloads += 1;
        Ok(record)
    }

    /// Replace the master token and bump the link version. Returns the new
    /// version.
    pub fn update_healing(&mut self, id: &str, new_master_token: String) -> VaultResult<u32> {
        let record = self.record_mut(id)?;
        record.master_token = new_master_token;
        record.link_version += 1;
        Ok(record.link_version)
    }

    /// Count one download of `id`. A burn-flagged record is removed together
    /// with its linked records, so no later claim can succeed.
    ///
    /// With `enforce_expiry`, an elapsed record answers `Gone`. The caller
    /// commits.
    pub fn claim_download(
        &mut self,
        id: &str,
        now_ms: u64,
        enforce_expiry: bool,
    ) -> VaultResult<Claim> {
        if enforce_expiry && self.record(id)?.is_expired(now_ms) {
            return Err(VaultError::Gone(format!("file {id} has expired")));
        }
        let record = self.increment_downloads(id)?.clone();
        let burned = if record.burn {
            self.remove_with_linked(id)
                .into_iter()
                .map(|r| r.file_id)
                .collect()
        } else {
            Vec::new()
        };
        Ok(Claim { record, burned })
    }

    pub fn token(&self, token: &str) -> VaultResult<&DisposableToken> {
        self.doc
            .disposable_tokens
            .get(token)
            .ok_or_else(|| VaultError::NotFound("unknown disposable token".into()))
    }

    pub fn token_mut(&mut self, token: &str) -> VaultResult<&mut DisposableToken> {
        self.doc
            .disposable_tokens
            .get_mut(token)
            .ok_or_else(|| VaultError::NotFound("unknown disposable token".into()))
    }

    pub fn insert_token(&mut self, token: DisposableToken) {
        self.doc.disposable_tokens.insert(token.token.clone(), token);
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            files: self.doc.files.len(),
            tokens: self.doc.disposable_tokens.len(),
        }
    }

    /// Mark the store changed and write it out. A write failure is logged
    /// and left for the next commit to retry.
    pub fn commit(&mut self) {
        self.dirty = true;
        if let Err(e) = self.flush() {
            tracing::warn!(path = %self.path.display(), "metadata flush failed, will retry: {e:#}");
        }
    }

    /// Flush dirty changes to disk using an atomic write (write, fsync, rename).
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating metadata dir: {}", parent.display()))?;
        }

        self.doc.version = STORE_VERSION;
        let json = serde_json::to_string_pretty(&self.doc).context("serializing metadata")?;

        let tmp_path = self.path.with_extension("tmp");
        write_synced(&tmp_path, json.as_bytes())
            .with_context(|| format!("writing metadata temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming metadata: {}", self.path.display()))?;

        self.dirty = false;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for StoreState {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush metadata on drop: {e}");
            }
        }
    }
}

/// Durable record store shared by request handlers and the sweeper.
pub struct VaultMetadataStore {
    state: Mutex<StoreState>,
}

impl VaultMetadataStore {
    /// Load the store at `path`, or start empty if the file does not exist.
    pub fn open(path: &Path) -> VaultResult<Self> {
        let doc = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading metadata: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing metadata: {}", path.display()))?
        } else {
            StoreDocument::default()
        };

        tracing::info!(
            path = %path.display(),
            files = doc.files.len(),
            tokens = doc.disposable_tokens.len(),
            "metadata store loaded"
        );

        Ok(Self {
            state: Mutex::new(StoreState {
                path: path.to_path_buf(),
                doc,
                dirty: false,
            }),
        })
    }

    /// Enter the store's critical section.
    pub async fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().await
    }

    pub async fn create(&self, record: FileRecord) -> VaultResult<()> {
        self.create_many(vec![record]).await
    }

    /// Insert several records in one critical section; either all are
    /// inserted or none.
    pub async fn create_many(&self, records: Vec<FileRecord>) -> VaultResult<()> {
        let mut state = self.lock().await;
        {
            let mut seen = HashSet::new();
            for record in &records {
                if state.contains(&record.file_id) || !seen.insert(record.file_id.as_str()) {
                    return Err(VaultError::Other(anyhow::anyhow!(
                        "file id {} already in use",
                        record.file_id
                    )));
                }
            }
        }
        for record in records {
            state.insert_record(record)?;
        }
        state.commit();
        Ok(())
    }

    pub async fn get(&self, id: &str) -> VaultResult<FileRecord> {
        self.lock().await.record(id).cloned()
    }

    pub async fn increment_downloads(&self, id: &str) -> VaultResult<FileRecord> {
        let mut state = self.lock().await;
        let record = state.increment_downloads(id)?.clone();
        state.commit();
        Ok(record)
    }

    /// Delete a record and its linked records. Returns what was removed.
    pub async fn delete(&self, id: &str) -> VaultResult<Vec<FileRecord>> {
        let mut state = self.lock().await;
        state.record(id)?;
        let removed = state.remove_with_linked(id);
        state.commit();
        Ok(removed)
    }

    pub async fn update_healing(&self, id: &str, new_master_token: String) -> VaultResult<u32> {
        let mut state = self.lock().await;
        let version = state.update_healing(id, new_master_token)?;
        state.commit();
        Ok(version)
    }

    /// Insert `decoy` and link it to its parent.
    pub async fn attach_decoy(&self, parent_id: &str, mut decoy: FileRecord) -> VaultResult<()> {
        let mut state = self.lock().await;
        let parent = state.record(parent_id)?;
        if parent.decoy_id.is_some() {
            return Err(VaultError::Format(format!(
                "file {parent_id} already has a decoy"
            )));
        }

        decoy.parent_id = Some(parent_id.to_string());
        let decoy_id = decoy.file_id.clone();
        state.insert_record(decoy)?;

        let parent = state.record_mut(parent_id)?;
        parent.has_decoy = true;
        parent.decoy_id = Some(decoy_id);
        state.commit();
        Ok(())
    }

    /// IDs of records whose expiry has elapsed.
    pub async fn expired_ids(&self, now_ms: u64) -> Vec<String> {
        self.lock()
            .await
            .doc
            .files
            .values()
            .filter(|r| r.is_expired(now_ms))
            .map(|r| r.file_id.clone())
            .collect()
    }

    pub async fn record_ids(&self) -> HashSet<String> {
        self.lock().await.doc.files.keys().cloned().collect()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.lock().await.contains(id)
    }

    /// IDs starting with `prefix`, optionally skipping elapsed records.
    pub async fn find_by_prefix(&self, prefix: &str, live_at: Option<u64>) -> Vec<String> {
        let state = self.lock().await;
        state
            .doc
            .files
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .filter(|(_, r)| live_at.map_or(true, |now| !r.is_expired(now)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove disposable tokens past their own expiry. Returns how many.
    pub async fn purge_expired_tokens(&self, now_ms: u64) -> usize {
        let mut state = self.lock().await;
        let before = state.doc.disposable_tokens.len();
        state
            .doc
            .disposable_tokens
            .retain(|_, t| !t.is_expired(now_ms));
        let purged = before - state.doc.disposable_tokens.len();
        if purged > 0 {
            state.commit();
        }
        purged
    }

    pub async fn counts(&self) -> StoreCounts {
        self.lock().await.counts()
    }

    /// Retry a pending flush, if any.
    pub async fn flush(&self) -> VaultResult<()> {
        self.lock().await.flush()?;
        Ok(())
    }
}

/// Write `bytes` to `path` and fsync before returning, so a following
/// rename never publishes a file whose data has not reached the disk.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> FileRecord {
        FileRecord {
            file_id: id.into(),
            master_token: format!("token-{id}"),
            created_at: 1_000,
            expires_at: 10_000,
            ..Default::default()
        }
    }

    fn open(dir: &TempDir) -> VaultMetadataStore {
        VaultMetadataStore::open(&dir.path().join("metadata.json")).unwrap()
    }

    #[tokio::test]
    async fn test_open_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        assert_eq!(store.counts().await, StoreCounts::default());
        assert!(!dir.path().join("metadata.json").exists());
    }

    #[tokio::test]
    async fn test_flush_replaces_stale_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // leftover from an interrupted flush
        std::fs::write(dir.path().join("metadata.tmp"), b"{\"files\": {\"trun").unwrap();

        let store = open(&dir);
        store.create(record("bb")).await.unwrap();
        assert!(!dir.path().join("metadata.tmp").exists());

        let raw = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["files"]["bb"]["masterToken"], "token-bb");
        assert_eq!(open(&dir).get("bb").await.unwrap().file_id, "bb");
    }

    #[tokio::test]
    async fn test_create_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.create(record("aa")).await.unwrap();
            assert!(!store.lock().await.is_dirty());
        }
        let reopened = open(&dir);
        let rec = reopened.get("aa").await.unwrap();
        assert_eq!(rec.master_token, "token-aa");
        assert!(!dir.path().join("metadata.tmp").exists());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.create(record("aa")).await.unwrap();
        assert!(store.create(record("aa")).await.is_err());
        assert!(store
            .create_many(vec![record("bb"), record("bb")])
            .await
            .is_err());
        assert!(!store.contains("bb").await);
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        assert!(matches!(
            store.get("nope").await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("nope").await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.create(record("aa")).await.unwrap();
        store.increment_downloads("aa").await.unwrap();
        let rec = store.increment_downloads("aa").await.unwrap();
        assert_eq!(rec.downloads, 2);
    }

    #[tokio::test]
    async fn test_update_healing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.create(record("aa")).await.unwrap();

        assert_eq!(store.update_healing("aa", "new".into()).await.unwrap(), 2);
        assert_eq!(store.update_healing("aa", "newer".into()).await.unwrap(), 3);
        assert_eq!(store.get("aa").await.unwrap().master_token, "newer");
    }

    #[tokio::test]
    async fn test_attach_decoy_and_lockstep_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.create(record("parent")).await.unwrap();
        store.attach_decoy("parent", record("decoy")).await.unwrap();

        let parent = store.get("parent").await.unwrap();
        assert!(parent.has_decoy);
        assert_eq!(parent.decoy_id.as_deref(), Some("decoy"));
        assert_eq!(
            store.get("decoy").await.unwrap().parent_id.as_deref(),
            Some("parent")
        );
        assert!(matches!(
            store.attach_decoy("parent", record("second")).await,
            Err(VaultError::Format(_))
        ));

        // deleting the child takes the parent too
        let removed = store.delete("decoy").await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.counts().await.files, 0);
    }

    #[tokio::test]
    async fn test_claim_burn_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store
            .create(FileRecord {
                burn: true,
                ..record("aa")
            })
            .await
            .unwrap();

        let mut state = store.lock().await;
        let claim = state.claim_download("aa", 5_000, true).unwrap();
        assert_eq!(claim.record.downloads, 1);
        assert_eq!(claim.burned, vec!["aa".to_string()]);
        assert!(matches!(
            state.claim_download("aa", 5_000, true),
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_expired_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.create(record("aa")).await.unwrap();

        let mut state = store.lock().await;
        assert!(matches!(
            state.claim_download("aa", 10_000, true),
            Err(VaultError::Gone(_))
        ));
        assert!(state.claim_download("aa", 10_000, false).is_ok());
    }

    #[tokio::test]
    async fn test_find_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.create(record("abc1")).await.unwrap();
        store.create(record("abc2")).await.unwrap();
        store
            .create(FileRecord {
                expires_at: 0,
                ..record("abd1")
            })
            .await
            .unwrap();

        assert_eq!(store.find_by_prefix("abc", None).await.len(), 2);
        assert_eq!(store.find_by_prefix("abd", None).await, vec!["abd1"]);
        assert!(store.find_by_prefix("abd", Some(5)).await.is_empty());
        assert!(store.find_by_prefix("zzz", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        {
            let mut state = store.lock().await;
            for (token, expires_at) in [("t1", 100), ("t2", 200)] {
                state.insert_token(DisposableToken {
                    token: token.into(),
                    file_id: "aa".into(),
                    expires_at,
                    ..Default::default()
                });
            }
            state.commit();
        }
        assert_eq!(store.purge_expired_tokens(150).await, 1);
        assert_eq!(store.counts().await.tokens, 1);
        assert_eq!(store.purge_expired_tokens(150).await, 0);
    }

    #[tokio::test]
    async fn test_forward_compatible_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(
            &path,
            r#"{
                "files": {
                    "aa": { "fileId": "aa", "burn": true, "someNewField": 42 }
                },
                "futureSection": []
            }"#,
        )
        .unwrap();

        let store = VaultMetadataStore::open(&path).unwrap();
        let rec = store.get("aa").await.unwrap();
        assert!(rec.burn);
        assert_eq!(rec.link_version, 1);
        assert_eq!(store.counts().await.tokens, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(VaultMetadataStore::open(&path).is_err());
    }

    #[tokio::test]
    async fn test_failed_flush_retried_on_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("state");
        // a regular file where the metadata directory should be
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("metadata.json");

        let store = VaultMetadataStore::open(&path).unwrap();
        store.create(record("aa")).await.unwrap();
        assert!(store.lock().await.is_dirty());
        assert!(store.get("aa").await.is_ok());

        std::fs::remove_file(&blocker).unwrap();
        store.create(record("bb")).await.unwrap();
        assert!(!store.lock().await.is_dirty());
        drop(store);

        let reopened = VaultMetadataStore::open(&path).unwrap();
        assert!(reopened.get("aa").await.is_ok());
        assert!(reopened.get("bb").await.is_ok());
    }
}
