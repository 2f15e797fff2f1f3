//! Error types for biometric key custody and authentication.
//!
//! Two families exist. [`KeystoreError`] describes failures of the secure
//! store and key material; the custodian absorbs these and reports an empty
//! result instead. [`AuthenticationError`] is what an application receives
//! through `on_failed` when an attempt ends in error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures at the secure-store boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeystoreError {
    /// Store could not be obtained from its provider or failed to load
    #[error("Secure store unavailable: {0}")]
    StoreUnavailable(String),

    /// Key generation was rejected by the backend
    #[error("Failed to generate key '{alias}': {reason}")]
    KeyGenerationFailed { alias: String, reason: String },

    /// Key material could not be fetched
    #[error("Failed to retrieve key '{alias}': {reason}")]
    KeyRetrievalFailed { alias: String, reason: String },

    /// Entry could not be deleted
    #[error("Failed to delete key '{alias}': {reason}")]
    KeyDeletionFailed { alias: String, reason: String },

    /// Key was permanently invalidated, e.g. by a biometric enrollment change
    #[error("Key has been permanently invalidated")]
    KeyInvalidated,

    /// Cipher requires a successful biometric authentication first
    #[error("Cipher operation requires user authentication")]
    NotAuthorized,

    /// Cipher operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

/// Result type for secure-store operations.
pub type KeystoreResult<T> = Result<T, KeystoreError>;

/// Stable numeric codes reported to applications.
///
/// Cancellation is delivered through `on_cancelled`, so it has no code here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    AuthenticationFailed = 6,
    Keychain = 8,
    EncryptionError = 14,
    WrongParameter = 15,
    BiometryNotAvailable = 18,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Error delivered to the application when an attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {})", .code.as_i32())]
pub struct AuthenticationError {
    pub code: ErrorCode,
    pub message: String,
}

impl AuthenticationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<KeystoreError> for AuthenticationError {
    fn from(err: KeystoreError) -> Self {
        let code = match &err {
            KeystoreError::KeyInvalidated => ErrorCode::BiometryNotAvailable,
            KeystoreError::NotAuthorized => ErrorCode::AuthenticationFailed,
            KeystoreError::Crypto(_) => ErrorCode::EncryptionError,
            _ => ErrorCode::Keychain,
        };
        AuthenticationError::new(code, err.to_string())
    }
}
