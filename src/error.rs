//! # Error Handling
//!
//! Error types for Veil Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Configuration (100-199)                                           │
//! │  │   ├── InvalidConfig         - Config rejected by validation         │
//! │  │   └── InvalidInput          - Argument outside accepted domain      │
//! │  │                                                                      │
//! │  ├── Identity (200-299)                                                │
//! │  │   ├── KeyGenerationFailed   - Key pair generation failed            │
//! │  │   └── NoIdentityKey         - User has no identity key              │
//! │  │                                                                      │
//! │  ├── Crypto (300-399)                                                  │
//! │  │   ├── EncryptionFailed      - Malformed key / AEAD failure          │
//! │  │   ├── DecryptionFailed      - Malformed input                       │
//! │  │   ├── AuthTagMismatch       - Tag did not verify (DecryptionFailed) │
//! │  │   ├── KeyDerivationFailed   - KDF rejected its inputs               │
//! │  │   ├── InvalidKey            - Wrong key length or encoding          │
//! │  │   ├── IntegrityCheckFailed  - Digest mismatch                       │
//! │  │   └── RngFailed             - OS entropy source failed              │
//! │  │                                                                      │
//! │  ├── Session (400-499)                                                 │
//! │  │   ├── KeyExchangeFailed     - Bad wrapped key / not a participant   │
//! │  │   ├── SessionExpired        - Active record is past expiresAt       │
//! │  │   └── NoActiveSession       - Conversation has no session yet       │
//! │  │                                                                      │
//! │  ├── Storage (600-699)                                                 │
//! │  │   ├── StorageError          - Store rejected an operation           │
//! │  │   ├── DatabaseError         - SQLite failure                        │
//! │  │   └── SerializationError    - Record encoding failure               │
//! │  │                                                                      │
//! │  └── Internal (900-999)                                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Diagnostics
//!
//! Variants that wrap an underlying library failure carry a [`Diagnostic`].
//! The diagnostic is kept for internal logging only and never appears in the
//! `Display` output, so nothing the crypto backend says can reach an end user
//! through `to_string()` or [`Error::to_public`].

use std::fmt;

use thiserror::Error;

/// Result type alias for Veil Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Internal diagnostic text attached to an error
///
/// `Debug` shows the text, `Display` is intentionally not implemented.
#[derive(Clone, PartialEq, Eq)]
pub struct Diagnostic(String);

impl Diagnostic {
    /// Wrap a diagnostic message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The raw diagnostic text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<&str> for Diagnostic {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Diagnostic {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Main error type for Veil Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (100-199)
    // ========================================================================

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller passed an argument outside the accepted domain
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// Identity key pair generation failed
    #[error("Identity key generation failed")]
    KeyGenerationFailed(Diagnostic),

    /// The user has no identity key (active or matching the request)
    #[error("No identity key for user {0}")]
    NoIdentityKey(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed")]
    EncryptionFailed(Diagnostic),

    /// Decryption failed on malformed input
    #[error("Decryption failed")]
    DecryptionFailed(Diagnostic),

    /// Authentication tag did not verify
    ///
    /// This is a decryption failure; see [`Error::is_decryption_error`].
    #[error("Decryption failed: authentication tag mismatch")]
    AuthTagMismatch,

    /// Key derivation failed
    #[error("Key derivation failed")]
    KeyDerivationFailed(Diagnostic),

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Content digest did not match
    #[error("Integrity check failed")]
    IntegrityCheckFailed,

    /// Random number generation failed
    #[error("Random number generation failed")]
    RngFailed(Diagnostic),

    // ========================================================================
    // Session Errors (400-499)
    // ========================================================================

    /// Wrapping or unwrapping a session key failed
    #[error("Key exchange failed")]
    KeyExchangeFailed(Diagnostic),

    /// The conversation's active session key has expired
    #[error("Session key for conversation {0} has expired")]
    SessionExpired(String),

    /// The conversation has never had a session key
    #[error("No active session key for conversation {0}")]
    NoActiveSession(String),

    // ========================================================================
    // Storage Errors (600-699)
    // ========================================================================

    /// Store rejected an operation
    #[error("Storage error")]
    StorageError(Diagnostic),

    /// Database error
    #[error("Database error")]
    DatabaseError(Diagnostic),

    /// Record serialization failed
    #[error("Serialization error")]
    SerializationError(Diagnostic),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error")]
    Internal(Diagnostic),
}

impl Error {
    /// Get the stable numeric error code
    ///
    /// - 100-199: Configuration
    /// - 200-299: Identity
    /// - 300-399: Crypto
    /// - 400-499: Session
    /// - 600-699: Storage
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) => 100,
            Error::InvalidInput(_) => 101,

            Error::KeyGenerationFailed(_) => 200,
            Error::NoIdentityKey(_) => 201,

            Error::EncryptionFailed(_) => 300,
            Error::DecryptionFailed(_) => 301,
            Error::AuthTagMismatch => 302,
            Error::KeyDerivationFailed(_) => 303,
            Error::InvalidKey(_) => 304,
            Error::IntegrityCheckFailed => 305,
            Error::RngFailed(_) => 306,

            Error::KeyExchangeFailed(_) => 400,
            Error::SessionExpired(_) => 401,
            Error::NoActiveSession(_) => 402,

            Error::StorageError(_) => 600,
            Error::DatabaseError(_) => 601,
            Error::SerializationError(_) => 602,

            Error::Internal(_) => 900,
        }
    }

    /// Whether this is a decryption failure (including tag mismatches)
    pub fn is_decryption_error(&self) -> bool {
        matches!(self, Error::DecryptionFailed(_) | Error::AuthTagMismatch)
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors are resolved by the caller requesting a new key or
    /// session and retrying the higher-level operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::KeyGenerationFailed(_)
                | Error::InvalidConfig(_)
                | Error::RngFailed(_)
                | Error::Internal(_)
        )
    }

    /// Internal diagnostic text, if the error wraps a library failure
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Error::KeyGenerationFailed(d)
            | Error::EncryptionFailed(d)
            | Error::DecryptionFailed(d)
            | Error::KeyDerivationFailed(d)
            | Error::RngFailed(d)
            | Error::KeyExchangeFailed(d)
            | Error::StorageError(d)
            | Error::DatabaseError(d)
            | Error::SerializationError(d)
            | Error::Internal(d) => Some(d.as_str()),
            _ => None,
        }
    }

    /// Convert into the shape that may be shown to an end user
    pub fn to_public(&self) -> PublicError {
        PublicError {
            code: self.code(),
            message: self.to_string(),
            recoverable: self.is_recoverable(),
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(Diagnostic::new(err.to_string()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(Diagnostic::new(err.to_string()))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(Diagnostic::new(format!("background task failed: {}", err)))
    }
}

// ============================================================================
// PUBLIC ERROR REPRESENTATION
// ============================================================================

/// Error representation safe to hand to collaborators outside the subsystem
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PublicError {
    /// Numeric error code
    pub code: i32,
    /// Human-readable error message (never contains diagnostics)
    pub message: String,
    /// Whether the caller can recover by retrying with a fresh key or session
    pub recoverable: bool,
}

impl From<Error> for PublicError {
    fn from(err: Error) -> Self {
        err.to_public()
    }
}

// ============================================================================
// TESTS
// ============================================================================
