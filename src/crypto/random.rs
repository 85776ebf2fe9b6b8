//! Cryptographically secure randomness.

use rand::rngs::OsRng;
use rand::RngCore;

use super::keys::SessionKey;
use super::{KEY_SIZE, NONCE_SIZE};
use crate::error::{Diagnostic, Error, Result};

/// Secure random source backed by the operating system CSPRNG
///
/// Stateless: every call reads from `OsRng`, so copies can be shared freely
/// across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureRandom;

impl SecureRandom {
    /// Create a random source
    pub fn new() -> Self {
        Self
    }

    /// Fill `dest` with random bytes
    pub fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| Error::RngFailed(Diagnostic::new(e.to_string())))
    }

    /// Return `n` random bytes
    pub fn random_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; n];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }

    /// Return a random fixed-size array
    pub fn random_array<const N: usize>(&self) -> Result<[u8; N]> {
        let mut bytes = [0u8; N];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }

    /// Uniform integer in `[min, max)`
    ///
    /// Uses rejection sampling over 64-bit draws: a draw is only accepted if
    /// it falls below the largest multiple of the range size, so every output
    /// value has exactly the same number of preimages.
    pub fn random_int(&self, min: i64, max: i64) -> Result<i64> {
        if min >= max {
            return Err(Error::InvalidInput(format!(
                "empty range [{}, {})",
                min, max
            )));
        }

        let span = (i128::from(max) - i128::from(min)) as u64;
        let zone = u64::MAX - (u64::MAX % span);

        loop {
            let draw = u64::from_le_bytes(self.random_array::<8>()?);
            if draw < zone {
                let offset = i128::from(draw % span);
                return Ok((i128::from(min) + offset) as i64);
            }
        }
    }

    /// Fresh 256-bit symmetric session key
    pub fn session_key(&self) -> Result<SessionKey> {
        Ok(SessionKey::from_bytes(self.random_array::<KEY_SIZE>()?))
    }

    /// Fresh AEAD nonce
    pub fn nonce(&self) -> Result<[u8; NONCE_SIZE]> {
        self.random_array::<NONCE_SIZE>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_bytes_length() {
        let rng = SecureRandom::new();
        assert_eq!(rng.random_bytes(0).unwrap().len(), 0);
        assert_eq!(rng.random_bytes(33).unwrap().len(), 33);
    }

    #[test]
    fn test_random_bytes_differ() {
        let rng = SecureRandom::new();
        assert_ne!(rng.random_bytes(32).unwrap(), rng.random_bytes(32).unwrap());
    }

    #[test]
    fn test_random_int_covers_range() {
        let rng = SecureRandom::new();
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            let v = rng.random_int(0, 6).unwrap();
            assert!((0..6).contains(&v));
            seen.insert(v);
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_random_int_single_value_range() {
        let rng = SecureRandom::new();
        assert_eq!(rng.random_int(41, 42).unwrap(), 41);
    }

    #[test]
    fn test_random_int_full_width_range() {
        let rng = SecureRandom::new();
        let v = rng.random_int(i64::MIN, i64::MAX).unwrap();
        assert!(v < i64::MAX);
    }

    #[test]
    fn test_random_int_empty_range() {
        let rng = SecureRandom::new();
        assert!(matches!(rng.random_int(5, 5), Err(Error::InvalidInput(_))));
        assert!(rng.random_int(10, -10).is_err());
    }

    #[test]
    fn test_session_keys_unique() {
        let rng = SecureRandom::new();
        let mut seen = HashSet::with_capacity(10_000);
        for _ in 0..10_000 {
            let key = rng.session_key().unwrap();
            assert!(seen.insert(*key.as_bytes()), "duplicate session key");
        }
    }

    proptest! {
        #[test]
        fn prop_random_int_in_bounds(min in -1_000_000i64..1_000_000, width in 1i64..1_000_000) {
            let rng = SecureRandom::new();
            let v = rng.random_int(min, min + width).unwrap();
            prop_assert!(v >= min && v < min + width);
        }
    }
}
