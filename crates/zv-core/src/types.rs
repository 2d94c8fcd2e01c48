use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::VaultError;

/// Current schema version written into every persisted record.
pub const RECORD_SCHEMA: u32 = 1;

/// Retention window chosen by the uploader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpiryOption {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[default]
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl ExpiryOption {
    pub fn duration(self) -> Duration {
        const HOUR: u64 = 60 * 60;
        Duration::from_secs(match self {
            ExpiryOption::OneHour => HOUR,
            ExpiryOption::SixHours => 6 * HOUR,
            ExpiryOption::OneDay => 24 * HOUR,
            ExpiryOption::SevenDays => 7 * 24 * HOUR,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryOption::OneHour => "1h",
            ExpiryOption::SixHours => "6h",
            ExpiryOption::OneDay => "24h",
            ExpiryOption::SevenDays => "7d",
        }
    }
}

impl fmt::Display for ExpiryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpiryOption {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(ExpiryOption::OneHour),
            "6h" => Ok(ExpiryOption::SixHours),
            "24h" => Ok(ExpiryOption::OneDay),
            "7d" => Ok(ExpiryOption::SevenDays),
            other => Err(VaultError::Format(format!(
                "unknown expiry option {other:?} (expected 1h, 6h, 24h or 7d)"
            ))),
        }
    }
}

/// Persisted values written by older or newer builds may carry an expiry
/// string this build does not know; those fall back to the default.
fn lenient_expiry<'de, D>(deserializer: D) -> Result<ExpiryOption, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| s.parse::<ExpiryOption>().ok())
        .unwrap_or_default())
}

fn default_schema() -> u32 {
    RECORD_SCHEMA
}

fn default_link_version() -> u32 {
    1
}

/// Metadata for one stored ciphertext blob.
///
/// Every field has a default so that records written before a field existed
/// (or by a build that added fields this one ignores) still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(default = "default_schema")]
    pub schema: u32,
    pub file_id: String,
    pub burn: bool,
    /// Unix milliseconds
    pub created_at: u64,
    /// Unix milliseconds
    pub expires_at: u64,
    #[serde(deserialize_with = "lenient_expiry")]
    pub expiry_option: ExpiryOption,
    pub downloads: u64,
    pub size: u64,
    pub master_token: String,
    pub file_hash: Option<String>,
    pub has_decoy: bool,
    pub decoy_id: Option<String>,
    #[serde(default = "default_link_version")]
    pub link_version: u32,
    pub is_dual_mode: bool,
    pub is_decoy_part: bool,
    pub parent_id: Option<String>,
}

impl Default for FileRecord {
    fn default() -> Self {
        Self {
            schema: RECORD_SCHEMA,
            file_id: String::new(),
            burn: false,
            created_at: 0,
            expires_at: 0,
            expiry_option: ExpiryOption::default(),
            downloads: 0,
            size: 0,
            master_token: String::new(),
            file_hash: None,
            has_decoy: false,
            decoy_id: None,
            link_version: 1,
            is_dual_mode: false,
            is_decoy_part: false,
            parent_id: None,
        }
    }
}

impl FileRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    /// IDs of records that share this record's deletion lifetime.
    pub fn linked_ids(&self) -> impl Iterator<Item = &str> {
        self.decoy_id
            .as_deref()
            .into_iter()
            .chain(self.parent_id.as_deref())
    }

    /// Client-visible subset of the record.
    pub fn info(&self) -> FileInfo {
        FileInfo {
            size: self.size,
            created_at: self.created_at,
            expires_at: self.expires_at,
            expiry_option: self.expiry_option,
            burn: self.burn,
            has_decoy: self.has_decoy,
            downloads: self.downloads,
            link_version: self.link_version,
            file_hash: self.file_hash.clone(),
        }
    }
}

/// Public projection returned by the info endpoint. Never carries tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub size: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub expiry_option: ExpiryOption,
    pub burn: bool,
    pub has_decoy: bool,
    pub downloads: u64,
    pub link_version: u32,
    pub file_hash: Option<String>,
}

/// Single-use download capability with its own lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DisposableToken {
    pub token: String,
    pub file_id: String,
    pub created_at: u64,
    pub used: bool,
    pub expires_at: u64,
}

impl DisposableToken {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
