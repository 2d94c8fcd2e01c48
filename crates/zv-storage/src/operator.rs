//! OpenDAL Operator factory for the local blob root

use anyhow::{Context, Result};
use opendal::Operator;
use std::path::Path;

/// Directory under the root used to stage writes before they are renamed
/// into place.
pub const STAGING_DIR: &str = ".staging";

/// Build an OpenDAL Operator over a local filesystem root.
///
/// Writes are staged in [`STAGING_DIR`] and renamed, so a reader never sees a
/// partially written blob.
pub fn build_fs_operator(root: &Path) -> Result<Operator> {
    let root = root.to_string_lossy();
    let staging = format!("{}/{STAGING_DIR}", root.trim_end_matches('/'));

    // opendal 0.55: Fs builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::Fs::default()
        .root(&root)
        .atomic_write_dir(&staging);

    let op = Operator::new(builder)
        .context("creating OpenDAL fs operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}
