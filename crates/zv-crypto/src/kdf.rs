//! Key derivation: password + salt → envelope key via PBKDF2-HMAC-SHA256

use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::keys::EnvelopeKey;
use crate::{KEY_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};

/// PBKDF2 parameters.
///
/// The round count is part of the envelope contract: a recipient must use the
/// same count as the sender, so production code always uses the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Parameters with an explicit round count; anything below the
    /// production count is rejected.
    pub fn with_iterations(iterations: u32) -> Result<Self, CryptoError> {
        if iterations < PBKDF2_ITERATIONS {
            return Err(CryptoError::Kdf(format!(
                "{iterations} rounds is below the minimum of {PBKDF2_ITERATIONS}"
            )));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    #[cfg(test)]
    pub(crate) fn fast_for_tests() -> Self {
        Self { iterations: 1_000 }
    }
}

/// Derive a 256-bit envelope key from a password and salt.
///
/// Pure: identical inputs always yield the identical key. The salt is carried
/// in clear at the front of password-mode envelopes.
pub fn derive_key_from_password(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> EnvelopeKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        params.iterations,
        &mut key,
    );
    EnvelopeKey::from_bytes(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("correct horse battery staple");
        let salt = [1u8; SALT_SIZE];
        let params = KdfParams::fast_for_tests();

        let key1 = derive_key_from_password(&password, &salt, &params);
        let key2 = derive_key_from_password(&password, &salt, &params);

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];
        let params = KdfParams::fast_for_tests();

        let key1 = derive_key_from_password(&SecretString::from("password-a"), &salt, &params);
        let key2 = derive_key_from_password(&SecretString::from("password-b"), &salt, &params);

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passwords must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");
        let params = KdfParams::fast_for_tests();

        let key1 = derive_key_from_password(&password, &[1u8; SALT_SIZE], &params);
        let key2 = derive_key_from_password(&password, &[2u8; SALT_SIZE], &params);

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different salts must produce different keys"
        );
    }

    #[test]
    fn test_production_rounds() {
        let password = SecretString::from("password");
        let mut salt = [0u8; SALT_SIZE];
        salt[..4].copy_from_slice(b"salt");

        let a = derive_key_from_password(&password, &salt, &KdfParams::default());
        let b = derive_key_from_password(&password, &salt, &KdfParams::default());
        assert_eq!(a, b);

        let fast = derive_key_from_password(&password, &salt, &KdfParams::fast_for_tests());
        assert_ne!(a, fast, "round count must change the key");
    }

    #[test]
    fn test_rejects_weak_iterations() {
        assert!(KdfParams::with_iterations(10).is_err());
        assert_eq!(
            KdfParams::with_iterations(200_000).unwrap().iterations(),
            200_000
        );
        assert_eq!(KdfParams::default().iterations(), PBKDF2_ITERATIONS);
    }
}
