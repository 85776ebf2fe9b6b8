//! # Cryptography Module
//!
//! The leaf primitives every other Veil Core component is built on.
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ SecureRandom     │   │ IntegrityVerifier│   │ KeyDerivation    │    │
//! │  │                  │   │                  │   │ Service          │    │
//! │  │ • OsRng bytes    │   │ • SHA-256        │   │ • PBKDF2-SHA256  │    │
//! │  │ • Rejection-     │   │ • Constant-time  │   │   (at-rest KEK)  │    │
//! │  │   sampled ints   │   │   compare        │   │ • HKDF-SHA256    │    │
//! │  └────────┬─────────┘   └──────────────────┘   │   (wrapping key) │    │
//! │           │                                    └────────┬─────────┘    │
//! │           ▼                                             │              │
//! │  ┌──────────────────────────────────────┐               │              │
//! │  │ CipherEngine (AES-256-GCM)           │◄──────────────┘              │
//! │  │                                      │                              │
//! │  │ • 256-bit key                        │                              │
//! │  │ • 96-bit random nonce per call       │                              │
//! │  │ • 128-bit detached tag               │                              │
//! │  │ • AAD = protocol label [‖ context]   │                              │
//! │  └──────────────────┬───────────────────┘                              │
//! │                     │                                                  │
//! │                     ▼                                                  │
//! │  ┌──────────────────────────────────────┐                              │
//! │  │ Key wrapping (X25519 + HKDF + GCM)   │                              │
//! │  │ one sealed copy per participant      │                              │
//! │  └──────────────────────────────────────┘                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | X25519 | Identity keys, session-key wrapping |
//! | AES-256-GCM | Message and wrapped-key encryption |
//! | SHA-256 | Fingerprints, integrity digests |
//! | HKDF-SHA256 | Wrapping key from ECDH output |
//! | PBKDF2-HMAC-SHA256 | Password → key-encryption-key |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: secret key types are zeroized when dropped
//! 2. **Constant-Time Comparison**: digests and fingerprints compare via `subtle`
//! 3. **Secure Random**: all randomness comes from `rand::rngs::OsRng`
//! 4. **No Nonce Reuse**: the nonce is drawn fresh and passed explicitly to AES-GCM

mod cipher;
mod integrity;
mod kdf;
mod keys;
mod random;
mod wrap;

pub use cipher::{CipherEngine, EncryptedPayload};
pub use integrity::{Digest, IntegrityVerifier, DIGEST_SIZE};
pub use kdf::{KeyDerivationService, KeyEncryptionKey};
pub use keys::{IdentityKeyPair, PrivateKey, PublicKey, SessionKey};
pub use random::SecureRandom;
pub use wrap::{unwrap_key, wrap_key, WrappedKey, WRAPPED_KEY_SIZE};

/// Size of symmetric keys in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of X25519 public and private keys in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
