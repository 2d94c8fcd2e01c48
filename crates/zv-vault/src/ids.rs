//! Random identifiers and bearer tokens

use zv_crypto::RandomSource;

/// Bytes of entropy in a file id (32 hex chars).
pub const FILE_ID_BYTES: usize = 16;
/// Bytes of entropy in a master token.
pub const MASTER_TOKEN_BYTES: usize = 32;
/// Bytes of entropy in a disposable token.
pub const DISPOSABLE_TOKEN_BYTES: usize = 24;
/// Length of a short code: a prefix of the file id.
pub const SHORT_CODE_LEN: usize = 8;

pub fn random_hex(rng: &dyn RandomSource, len: usize) -> String {
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn new_file_id(rng: &dyn RandomSource) -> String {
    random_hex(rng, FILE_ID_BYTES)
}

/// Uniform value in `[0, 1)` drawn from the source.
pub fn random_unit(rng: &dyn RandomSource) -> f64 {
    let mut buf = [0u8; 8];
    rng.fill_bytes(&mut buf);
    (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64
}

pub fn is_short_code(code: &str) -> bool {
    code.len() == SHORT_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zv_crypto::{OsRandom, SeededRandom};

    #[test]
    fn file_ids_are_hex_and_distinct() {
        let a = new_file_id(&OsRandom);
        let b = new_file_id(&OsRandom);
        assert_eq!(a.len(), FILE_ID_BYTES * 2);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn unit_interval() {
        let rng = SeededRandom::new(3);
        for _ in 0..1000 {
            let x = random_unit(&rng);
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn short_code_shape() {
        assert!(is_short_code("0a1b2c3d"));
        assert!(!is_short_code("0A1B2C3D"));
        assert!(!is_short_code("0a1b2c3"));
        assert!(!is_short_code("0a1b2c3g"));
    }
}
