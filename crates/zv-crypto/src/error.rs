use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("malformed input: {0}")]
    Format(String),

    /// Tag mismatch. Deliberately the same for a wrong key and for tampering.
    #[error("authentication failed: wrong key or corrupted data")]
    Authentication,

    #[error("key derivation failed: {0}")]
    Kdf(String),
}
