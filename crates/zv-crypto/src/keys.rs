//! Envelope keys: generation and the hex form embedded in capability links

use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::random::RandomSource;
use crate::KEY_SIZE;

/// A 256-bit AES-GCM key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvelopeKey {
    bytes: [u8; KEY_SIZE],
}

impl EnvelopeKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Fresh random key from the given source.
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl Drop for EnvelopeKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Serialize a key as 64 lowercase hex characters.
pub fn export_key(key: &EnvelopeKey) -> String {
    hex::encode(key.as_bytes())
}

/// Parse the output of [`export_key`]. Accepts either hex case.
pub fn import_key(text: &str) -> Result<EnvelopeKey, CryptoError> {
    if text.len() != KEY_SIZE * 2 {
        return Err(CryptoError::Format(format!(
            "key must be {} hex characters, got {}",
            KEY_SIZE * 2,
            text.len()
        )));
    }
    let mut bytes = [0u8; KEY_SIZE];
    hex::decode_to_slice(text, &mut bytes)
        .map_err(|e| CryptoError::Format(format!("key is not valid hex: {e}")))?;
    Ok(EnvelopeKey::from_bytes(bytes))
}
