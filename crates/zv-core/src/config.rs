use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level daemon configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZvConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub vault: VaultConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address (default: 127.0.0.1:3000)
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local filesystem root holding blobs and the record store
    pub root: PathBuf,
    /// Blob directory, relative to `root`
    pub uploads_dir: String,
    /// Record store file, relative to `root`
    pub metadata_file: String,
}

impl StorageConfig {
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(&self.metadata_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Uploads above this size are rejected
    pub max_upload_bytes: u64,
    /// Lifetime of a disposable download token, independent of the file
    pub disposable_ttl_secs: u64,
    /// Lower bound for generated decoy filler
    pub decoy_min_bytes: u64,
    /// Answer Gone for elapsed records before the sweeper reaches them
    pub lazy_expiry: bool,
}

impl VaultConfig {
    pub fn disposable_ttl(&self) -> Duration {
        Duration::from_secs(self.disposable_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds between sweeper passes
    pub sweep_interval_secs: u64,
    /// Blobs with no record are deleted once orphaned for this long
    pub orphan_threshold_secs: u64,
    /// Delay between a burn response closing and the blob deletion
    pub burn_delete_delay_ms: u64,
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn orphan_threshold(&self) -> Duration {
        Duration::from_secs(self.orphan_threshold_secs)
    }

    pub fn burn_delete_delay(&self) -> Duration {
        Duration::from_millis(self.burn_delete_delay_ms)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/zerovault"),
            uploads_dir: "uploads".into(),
            metadata_file: "metadata.json".into(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * 1024 * 1024,
            disposable_ttl_secs: 60 * 60,
            decoy_min_bytes: 1024,
            lazy_expiry: true,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            orphan_threshold_secs: 24 * 60 * 60,
            burn_delete_delay_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
listen = "0.0.0.0:8080"
log_level = "debug"
log_format = "text"

[storage]
root = "/srv/zv"
uploads_dir = "blobs"
metadata_file = "records.json"

[vault]
max_upload_bytes = 1048576
disposable_ttl_secs = 600
decoy_min_bytes = 4096
lazy_expiry = false

[retention]
sweep_interval_secs = 30
orphan_threshold_secs = 3600
burn_delete_delay_ms = 250
"#;
        let config: ZvConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.listen, "0.0.0.0:8080");
        assert_eq!(config.daemon.log_format, "text");
        assert_eq!(config.storage.root, PathBuf::from("/srv/zv"));
        assert_eq!(
            config.storage.metadata_path(),
            PathBuf::from("/srv/zv/records.json")
        );
        assert_eq!(config.vault.max_upload_bytes, 1_048_576);
        assert_eq!(config.vault.disposable_ttl(), Duration::from_secs(600));
        assert!(!config.vault.lazy_expiry);
        assert_eq!(config.retention.sweep_interval(), Duration::from_secs(30));
        assert_eq!(
            config.retention.burn_delete_delay(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config: ZvConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.listen, "127.0.0.1:3000");
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.storage.uploads_dir, "uploads");
        assert_eq!(config.vault.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.vault.disposable_ttl_secs, 3600);
        assert!(config.vault.lazy_expiry);
        assert_eq!(config.retention.sweep_interval_secs, 60);
        assert_eq!(config.retention.orphan_threshold_secs, 86_400);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[vault]
disposable_ttl_secs = 120
"#;
        let config: ZvConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.vault.disposable_ttl_secs, 120);
        // Defaults
        assert_eq!(config.vault.decoy_min_bytes, 1024);
        assert_eq!(config.storage.metadata_file, "metadata.json");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ZvConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ZvConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.daemon.listen, parsed.daemon.listen);
        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.vault.max_upload_bytes, parsed.vault.max_upload_bytes);
    }
}
