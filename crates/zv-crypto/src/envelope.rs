//! AES-256-GCM envelope encryption/decryption
//!
//! Envelope format (binary):
//! ```text
//! [16 bytes: PBKDF2 salt, password mode only][12 bytes: random IV][ciphertext][16 bytes: GCM tag]
//! ```
//!
//! A fresh IV is drawn for every call to [`CryptoEnvelope::encrypt`]. The
//! envelope never carries the key, the password, or the filename.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;

use crate::error::CryptoError;
use crate::kdf::{derive_key_from_password, KdfParams};
use crate::keys::EnvelopeKey;
use crate::random::{OsRandom, RandomSource};
use crate::{IV_SIZE, SALT_SIZE, TAG_SIZE};

/// Envelope builder bound to a random source.
pub struct CryptoEnvelope<R: RandomSource = OsRandom> {
    rng: R,
}

impl CryptoEnvelope<OsRandom> {
    pub fn new() -> Self {
        Self { rng: OsRandom }
    }
}

impl Default for CryptoEnvelope<OsRandom> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RandomSource> CryptoEnvelope<R> {
    pub fn with_random(rng: R) -> Self {
        Self { rng }
    }

    /// Fresh 256-bit key.
    pub fn generate_key(&self) -> EnvelopeKey {
        EnvelopeKey::generate(&self.rng)
    }

    /// Fresh salt for password mode.
    pub fn generate_salt(&self) -> [u8; SALT_SIZE] {
        let mut salt = [0u8; SALT_SIZE];
        self.rng.fill_bytes(&mut salt);
        salt
    }

    /// Encrypt `plaintext` under `key`.
    ///
    /// When `salt` is given it is written in front of the IV, producing a
    /// password-mode envelope.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key: &EnvelopeKey,
        salt: Option<&[u8; SALT_SIZE]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(key.as_bytes().into());

        let mut iv = [0u8; IV_SIZE];
        self.rng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Format("plaintext too large for AES-GCM".into()))?;

        let prefix = salt.map_or(0, |s| s.len());
        let mut result = Vec::with_capacity(prefix + IV_SIZE + ciphertext.len());
        if let Some(salt) = salt {
            result.extend_from_slice(salt);
        }
        result.extend_from_slice(&iv);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Derive a key from `password` under a fresh salt and encrypt.
    pub fn encrypt_with_password(
        &self,
        plaintext: &[u8],
        password: &SecretString,
        params: &KdfParams,
    ) -> Result<Vec<u8>, CryptoError> {
        let salt = self.generate_salt();
        let key = derive_key_from_password(password, &salt, params);
        self.encrypt(plaintext, &key, Some(&salt))
    }
}

/// Read the salt from the front of a password-mode envelope.
pub fn read_salt(envelope: &[u8]) -> Result<[u8; SALT_SIZE], CryptoError> {
    check_len(envelope, true)?;
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&envelope[..SALT_SIZE]);
    Ok(salt)
}

/// Decrypt an envelope.
///
/// `password_mode` says whether a salt prefix is present. Returns the full
/// plaintext or an error, never a partial result.
pub fn decrypt(
    envelope: &[u8],
    key: &EnvelopeKey,
    password_mode: bool,
) -> Result<Vec<u8>, CryptoError> {
    check_len(envelope, password_mode)?;

    let body = if password_mode {
        &envelope[SALT_SIZE..]
    } else {
        envelope
    };
    let (iv, ciphertext) = body.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

/// Read the salt, derive the key, and decrypt a password-mode envelope.
pub fn decrypt_with_password(
    envelope: &[u8],
    password: &SecretString,
    params: &KdfParams,
) -> Result<Vec<u8>, CryptoError> {
    let salt = read_salt(envelope)?;
    let key = derive_key_from_password(password, &salt, params);
    decrypt(envelope, &key, true)
}

fn check_len(envelope: &[u8], password_mode: bool) -> Result<(), CryptoError> {
    let min = if password_mode { SALT_SIZE } else { 0 } + IV_SIZE + TAG_SIZE;
    if envelope.len() < min {
        return Err(CryptoError::Format(format!(
            "envelope too short: {} bytes (minimum {min})",
            envelope.len()
        )));
    }
    Ok(())
}
