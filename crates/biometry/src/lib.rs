//! Biometric key custody and result coordination for Keyward.
//!
//! This crate keeps a single biometry-protected key inside a secure key store
//! and turns the racing outcomes of a biometric prompt into exactly one
//! application callback.
//!
//! # Core Concepts
//!
//! - **Key Custodian**: owns the one key entry under a fixed alias; create,
//!   fetch and remove it, downgrading every store failure to "no key"
//! - **Key Encryptor**: symmetric (ChaCha20-Poly1305) or asymmetric
//!   (P-256 ECIES) wrapper producing cipher contexts that need biometric
//!   authorization before use
//! - **Result Coordinator**: serializes success, failure, user cancel and
//!   application cancel for one attempt onto a callback dispatcher
//! - **Biometric Authenticator**: glue that runs register and unlock attempts
//!   and removes the key when it becomes unusable
//!
//! # Security Model
//!
//! Key material never leaves the store wrapper and is zeroized on drop. Keys
//! created with enrollment invalidation stop working permanently once the
//! enrolled biometrics change.

pub mod authenticator;
pub mod coordinator;
pub mod custodian;
pub mod dispatcher;
pub mod encryptor;
pub mod error;
pub mod key;
pub mod keystore;
pub mod software;

#[cfg(test)]
mod test_support;

pub use authenticator::{AuthenticationRequest, BiometricAuthenticator, BiometricPrompt, PromptSession};
pub use coordinator::{
    AttemptState, AttemptWatch, AuthenticationCallback, CancelHandle, CompletionSink, Phase, ResultCoordinator,
};
pub use custodian::KeyCustodian;
pub use dispatcher::{CallbackDispatcher, SerialDispatcher, Task};
pub use encryptor::{
    Algorithm, AlgorithmParameters, BiometricKeyData, CipherContext, CipherDirection, KeyEncryptor,
};
pub use error::{AuthenticationError, ErrorCode, KeystoreError, KeystoreResult};
pub use key::{KeyEntry, KeyKind, KeySpec, PrivateKey, StoredKey, SymmetricKey};
pub use keystore::{KeyStoreProvider, SecureKeyStore};
pub use software::{SoftwareKeyStore, SoftwareKeyStoreProvider};

// Re-export core types for convenience
pub use keyward_core::{Config, DispatcherConfig, KeystoreConfig};
