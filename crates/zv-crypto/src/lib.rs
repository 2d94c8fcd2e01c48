//! zv-crypto: client-side encryption for ZeroVault
//!
//! Everything here runs on the sender's and recipient's machines. The server
//! only ever sees the envelope bytes and an opaque file id.
//!
//! Envelope layout:
//! ```text
//! key mode:      [12-byte IV][ciphertext + 16-byte GCM tag]
//! password mode: [16-byte salt][12-byte IV][ciphertext + 16-byte GCM tag]
//! ```
//!
//! Capability fragment (held client-side, after the `#` of a share URL):
//! ```text
//! <fileId>:<hex key | PASSWORD>:<base64(utf8(filename))>
//! ```

pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod link;
pub mod random;

pub use envelope::{decrypt, decrypt_with_password, read_salt, CryptoEnvelope};
pub use error::CryptoError;
pub use kdf::{derive_key_from_password, KdfParams};
pub use keys::{export_key, import_key, EnvelopeKey};
pub use link::{
    decode_filename, CapabilityLink, DecodedFilename, FilenameStrategy, KeyPart, FALLBACK_FILENAME,
};
pub use random::{OsRandom, RandomSource, SeededRandom};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of the PBKDF2 salt carried in password-mode envelopes
pub const SALT_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// PBKDF2-HMAC-SHA256 rounds used for password keys
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Key slot value in a fragment when the key is derived from a password
pub const PASSWORD_SENTINEL: &str = "PASSWORD";
