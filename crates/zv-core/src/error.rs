use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Errors surfaced by vault operations.
///
/// The first six variants are externally visible and map to stable codes;
/// the remaining ones are internal and are reported as `"internal"` without
/// their detail.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("malformed input: {0}")]
    Format(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("gone: {0}")]
    Gone(String),

    #[error("too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("authentication failed")]
    Authentication,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Stable, machine-distinguishable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::Format(_) => "format",
            VaultError::NotFound(_) => "not_found",
            VaultError::Forbidden(_) => "forbidden",
            VaultError::Gone(_) => "gone",
            VaultError::TooLarge { .. } => "too_large",
            VaultError::Authentication => "authentication",
            VaultError::Storage(_) | VaultError::Io(_) | VaultError::Other(_) => "internal",
        }
    }

    /// True for errors whose detail must not reach a client.
    pub fn is_internal(&self) -> bool {
        self.kind() == "internal"
    }

    /// Message safe to show to a client.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "internal error".to_string()
        } else {
            self.to_string()
        }
    }
}
