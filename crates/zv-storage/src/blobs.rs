//! Ciphertext blob store keyed by file id

use opendal::{ErrorKind, Operator};
use zv_core::{VaultError, VaultResult};

/// Opaque envelopes stored at `<uploads_dir>/<fileId>`.
///
/// The store never interprets blob contents.
#[derive(Clone)]
pub struct BlobStore {
    op: Operator,
    prefix: String,
}

impl BlobStore {
    pub fn new(op: Operator, uploads_dir: &str) -> Self {
        let prefix = format!("{}/", uploads_dir.trim_matches('/'));
        Self { op, prefix }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn path(&self, id: &str) -> VaultResult<String> {
        validate_id(id)?;
        Ok(format!("{}{id}", self.prefix))
    }

    pub async fn put(&self, id: &str, bytes: Vec<u8>) -> VaultResult<()> {
        let path = self.path(id)?;
        let len = bytes.len();
        self.op
            .write(&path, bytes)
            .await
            .map_err(|e| storage_err(id, e))?;
        tracing::debug!(file_id = %id, bytes = len, "blob written");
        Ok(())
    }

    pub async fn read(&self, id: &str) -> VaultResult<Vec<u8>> {
        let path = self.path(id)?;
        let buf = self.op.read(&path).await.map_err(|e| storage_err(id, e))?;
        Ok(buf.to_vec())
    }

    /// Delete a blob. Deleting a blob that does not exist succeeds.
    pub async fn delete(&self, id: &str) -> VaultResult<()> {
        let path = self.path(id)?;
        self.op.delete(&path).await.map_err(|e| storage_err(id, e))?;
        tracing::debug!(file_id = %id, "blob deleted");
        Ok(())
    }

    pub async fn exists(&self, id: &str) -> VaultResult<bool> {
        let path = self.path(id)?;
        self.op.exists(&path).await.map_err(|e| storage_err(id, e))
    }

    /// IDs of every blob under the uploads directory.
    pub async fn list_ids(&self) -> VaultResult<Vec<String>> {
        let entries = match self.op.list(&self.prefix).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::Storage(format!("listing blobs: {e}"))),
        };
        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.name().to_string())
            .filter(|name| validate_id(name).is_ok())
            .collect())
    }
}

/// Blob ids are path components; anything outside `[A-Za-z0-9_-]` is refused.
fn validate_id(id: &str) -> VaultResult<()> {
    if id.is_empty()
        || !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(VaultError::Format(format!("invalid file id {id:?}")));
    }
    Ok(())
}

fn storage_err(id: &str, e: opendal::Error) -> VaultError {
    if e.kind() == ErrorKind::NotFound {
        VaultError::NotFound(format!("blob {id}"))
    } else {
        VaultError::Storage(format!("blob {id}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::build_fs_operator;

    fn store(dir: &tempfile::TempDir) -> BlobStore {
        BlobStore::new(build_fs_operator(dir.path()).unwrap(), "uploads")
    }

    #[tokio::test]
    async fn test_put_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir);

        blobs.put("abc123", b"ciphertext".to_vec()).await.unwrap();
        assert!(blobs.exists("abc123").await.unwrap());
        assert_eq!(blobs.read("abc123").await.unwrap(), b"ciphertext");

        tokio_test::assert_ok!(blobs.delete("abc123").await);
        assert!(!blobs.exists("abc123").await.unwrap());
        assert!(matches!(
            blobs.read("abc123").await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        tokio_test::assert_ok!(store(&dir).delete("nothing").await);
    }

    #[tokio::test]
    async fn test_list_ids() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir);
        assert!(blobs.list_ids().await.unwrap().is_empty());

        blobs.put("a1", vec![1]).await.unwrap();
        blobs.put("b2", vec![2]).await.unwrap();

        let mut ids = blobs.list_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a1", "b2"]);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir);
        for bad in ["../etc/passwd", "a/b", "", "x y"] {
            assert!(matches!(
                blobs.put(bad, vec![0]).await,
                Err(VaultError::Format(_))
            ));
        }
    }
}
