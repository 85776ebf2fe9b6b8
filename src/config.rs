//! Cipher suite and key-management configuration.
//!
//! Every component is constructed from one shared [`CryptoConfig`] instead of
//! module-level constants, so hosts and tests can inject their own values.

use serde::{Deserialize, Serialize};

use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// Default associated-data label bound into every AEAD operation
pub const DEFAULT_ASSOCIATED_DATA: &str = "veil-e2ee-v1";

/// Default PBKDF2 iteration count
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Default salt length in bytes
pub const DEFAULT_SALT_SIZE: usize = 16;

/// Default session-key lifetime in seconds (1 hour)
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

/// Minimum accepted salt length in bytes
const MIN_SALT_SIZE: usize = 8;

/// Cryptographic configuration shared by all components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Label identifying the application/protocol version, bound as AAD
    pub associated_data: String,
    /// AEAD nonce length in bytes
    ///
    /// Read-only: the cipher always uses `NONCE_SIZE`. The field states that
    /// length in config files, and `validate` rejects any other value.
    pub nonce_size: usize,
    /// AEAD tag length in bytes; read-only like `nonce_size`, fixed at `TAG_SIZE`
    pub tag_size: usize,
    /// PBKDF2 iterations for key-encryption-keys
    pub kdf_iterations: u32,
    /// Salt length produced by `generate_salt`
    pub salt_size: usize,
    /// Session lifetime used when the caller does not pass one
    pub default_session_ttl_secs: i64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            associated_data: DEFAULT_ASSOCIATED_DATA.to_string(),
            nonce_size: NONCE_SIZE,
            tag_size: TAG_SIZE,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            salt_size: DEFAULT_SALT_SIZE,
            default_session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl CryptoConfig {
    /// Configuration with a cheap KDF, for unit tests
    pub fn for_tests() -> Self {
        Self {
            kdf_iterations: 1_000,
            ..Self::default()
        }
    }

    /// Check that the primitives can honor these values
    ///
    /// AES-256-GCM in the `aes-gcm` crate is fixed at a 96-bit nonce and a
    /// 128-bit tag, so those two fields must match exactly.
    pub fn validate(&self) -> Result<()> {
        if self.associated_data.is_empty() {
            return Err(Error::InvalidConfig("associated_data must not be empty".into()));
        }
        if self.nonce_size != NONCE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "nonce_size must be {} for AES-256-GCM, got {}",
                NONCE_SIZE, self.nonce_size
            )));
        }
        if self.tag_size != TAG_SIZE {
            return Err(Error::InvalidConfig(format!(
                "tag_size must be {} for AES-256-GCM, got {}",
                TAG_SIZE, self.tag_size
            )));
        }
        if self.kdf_iterations == 0 {
            return Err(Error::InvalidConfig("kdf_iterations must be positive".into()));
        }
        if self.salt_size < MIN_SALT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "salt_size must be at least {} bytes",
                MIN_SALT_SIZE
            )));
        }
        if self.default_session_ttl_secs <= 0 {
            return Err(Error::InvalidConfig(
                "default_session_ttl_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Key length in bytes (always 32)
    pub fn key_size(&self) -> usize {
        KEY_SIZE
    }

    /// Parse and validate a TOML document
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| Error::InvalidConfig(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `VEIL_*` environment variables on top of the defaults
    ///
    /// Recognized: `VEIL_ASSOCIATED_DATA`, `VEIL_KDF_ITERATIONS`,
    /// `VEIL_SALT_SIZE`, `VEIL_SESSION_TTL_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(label) = lookup("VEIL_ASSOCIATED_DATA") {
            config.associated_data = label;
        }
        if let Some(v) = lookup("VEIL_KDF_ITERATIONS") {
            config.kdf_iterations = parse_var("VEIL_KDF_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("VEIL_SALT_SIZE") {
            config.salt_size = parse_var("VEIL_SALT_SIZE", &v)?;
        }
        if let Some(v) = lookup("VEIL_SESSION_TTL_SECS") {
            config.default_session_ttl_secs = parse_var("VEIL_SESSION_TTL_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} is not a valid number: {:?}", name, value)))
}
