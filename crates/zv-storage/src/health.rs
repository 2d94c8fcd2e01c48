//! Storage health check

use anyhow::Result;
use opendal::Operator;

/// Verify the blob root is reachable by listing it
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::build_fs_operator;

    #[tokio::test]
    async fn test_healthy_root() {
        let dir = tempfile::tempdir().unwrap();
        let op = build_fs_operator(dir.path()).unwrap();
        check_health(&op).await.unwrap();
    }
}
