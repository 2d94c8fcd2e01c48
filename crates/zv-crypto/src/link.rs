//! Capability links: `<fileId>:<key|PASSWORD>:<base64(utf8(filename))>`
//!
//! The fragment is built and read only on clients; a server never receives
//! it as a unit. The filename is base64 with the standard alphabet and
//! padding, which cannot contain `:`, so names with colons or any non-ASCII
//! text survive a round trip. Decoding splits at the first two colons only.
//!
//! Older links (hand-edited, copied through URL-escaping chat clients, or
//! produced by legacy clients) are read with an ordered list of fallbacks;
//! see [`FilenameStrategy`].

use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurposeConfig, DecodePaddingMode, GeneralPurpose},
    Engine,
};

use crate::error::CryptoError;
use crate::PASSWORD_SENTINEL;

/// Name used when no strategy can recover the filename.
pub const FALLBACK_FILENAME: &str = "downloaded_file";

/// Standard alphabet; writes padding, accepts input with or without it.
const FILENAME_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Key slot of a fragment.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyPart {
    /// Hex-exported raw key (see [`crate::export_key`])
    Key(String),
    /// Key is derived from a password and the envelope's salt
    Password,
}

impl KeyPart {
    fn from_segment(segment: &str) -> Self {
        if segment == PASSWORD_SENTINEL {
            KeyPart::Password
        } else {
            KeyPart::Key(segment.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyPart::Key(k) => k,
            KeyPart::Password => PASSWORD_SENTINEL,
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, KeyPart::Password)
    }
}

impl std::fmt::Debug for KeyPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPart::Key(_) => f.write_str("Key([REDACTED])"),
            KeyPart::Password => f.write_str("Password"),
        }
    }
}

/// Decoded capability fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityLink {
    pub file_id: String,
    pub key: KeyPart,
    pub filename: String,
    /// Strategy that produced `filename`; `None` means the placeholder.
    pub filename_strategy: Option<FilenameStrategy>,
}

impl CapabilityLink {
    /// Build the fragment for a file. Everything accepted here decodes back
    /// unchanged: the key is hex or `PASSWORD` and the filename is non-empty.
    pub fn encode(file_id: &str, key: &KeyPart, filename: &str) -> Result<String, CryptoError> {
        if file_id.is_empty() || file_id.contains([':', '#', '/']) {
            return Err(CryptoError::Format(format!(
                "file id {file_id:?} is empty or contains a reserved character"
            )));
        }
        if let KeyPart::Key(hex_key) = key {
            if hex_key.is_empty() || !hex_key.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(CryptoError::Format("key segment must be non-empty hex".into()));
            }
        }
        if filename.is_empty() {
            return Err(CryptoError::Format("filename is empty".into()));
        }
        Ok(format!(
            "{file_id}:{}:{}",
            key.as_str(),
            FILENAME_B64.encode(filename.as_bytes())
        ))
    }

    /// Parse a fragment. Accepts the bare fragment, `#fragment`, or a full
    /// share URL.
    pub fn decode(input: &str) -> Result<Self, CryptoError> {
        let fragment = input.rsplit_once('#').map_or(input, |(_, f)| f);

        let mut parts = fragment.splitn(3, ':');
        let (Some(file_id), Some(key), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Format(
                "link must have the form <fileId>:<key>:<filename>".into(),
            ));
        };
        if file_id.is_empty() || key.is_empty() {
            return Err(CryptoError::Format(
                "link has an empty file id or key segment".into(),
            ));
        }

        let decoded = decode_filename(name);
        Ok(Self {
            file_id: file_id.to_string(),
            key: KeyPart::from_segment(key),
            filename: decoded.name,
            filename_strategy: decoded.strategy,
        })
    }

    /// Full share URL for `origin` (e.g. `https://vault.example`).
    pub fn share_url(&self, origin: &str) -> Result<String, CryptoError> {
        let fragment = Self::encode(&self.file_id, &self.key, &self.filename)?;
        Ok(format!("{}/#{fragment}", origin.trim_end_matches('/')))
    }
}

/// One way of turning the filename segment back into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameStrategy {
    /// Percent-decode, then base64, then strict UTF-8. The current encoding,
    /// tolerant of `%3D`-style escaping picked up in transit.
    PercentBase64Utf8,
    /// Base64 without percent-decoding; bytes read as Latin-1.
    RawBase64,
    /// Plain percent-encoded UTF-8 text.
    Percent,
}

impl FilenameStrategy {
    /// Order in which strategies are tried.
    pub const ORDER: [FilenameStrategy; 3] = [
        FilenameStrategy::PercentBase64Utf8,
        FilenameStrategy::RawBase64,
        FilenameStrategy::Percent,
    ];

    pub fn apply(self, segment: &str) -> Result<String, CryptoError> {
        let name = match self {
            FilenameStrategy::PercentBase64Utf8 => {
                let unescaped = percent_decode(segment)?;
                let bytes = base64_decode(&unescaped)?;
                String::from_utf8(bytes)
                    .map_err(|_| CryptoError::Format("filename is not UTF-8".into()))?
            }
            FilenameStrategy::RawBase64 => base64_decode(segment)?
                .into_iter()
                .map(char::from)
                .collect(),
            FilenameStrategy::Percent => percent_decode(segment)?,
        };
        if name.is_empty() {
            return Err(CryptoError::Format("filename is empty".into()));
        }
        Ok(name)
    }
}

/// Result of [`decode_filename`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFilename {
    pub name: String,
    pub strategy: Option<FilenameStrategy>,
}

/// Recover a filename from a fragment segment. Never fails; when every
/// strategy fails the result is [`FALLBACK_FILENAME`].
pub fn decode_filename(segment: &str) -> DecodedFilename {
    for strategy in FilenameStrategy::ORDER {
        match strategy.apply(segment) {
            Ok(name) => {
                return DecodedFilename {
                    name,
                    strategy: Some(strategy),
                }
            }
            Err(e) => tracing::trace!(?strategy, error = %e, "filename strategy failed"),
        }
    }
    DecodedFilename {
        name: FALLBACK_FILENAME.to_string(),
        strategy: None,
    }
}

fn percent_decode(s: &str) -> Result<String, CryptoError> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|_| CryptoError::Format("percent-decoded text is not UTF-8".into()))
}

fn base64_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    FILENAME_B64
        .decode(s)
        .map_err(|e| CryptoError::Format(format!("invalid base64: {e}")))
}
