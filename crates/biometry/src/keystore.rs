//! Secure key store port.
//!
//! Platform backends (Android Keystore, Secure Enclave, a TPM) implement
//! [`SecureKeyStore`]; a [`KeyStoreProvider`] hands out store instances by
//! provider name. The crate ships a software implementation in
//! [`crate::software`].

use crate::error::KeystoreResult;
use crate::key::{KeySpec, StoredKey};

/// Alias-addressed secure storage for key material.
pub trait SecureKeyStore: Send {
    /// (Re)load store state from the backend.
    fn load(&mut self) -> KeystoreResult<()>;

    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool>;

    /// Generate a key under `alias`, replacing any existing entry.
    fn generate_key(&mut self, alias: &str, spec: KeySpec) -> KeystoreResult<StoredKey>;

    /// Fetch the entry under `alias` without supplying an unlocking secret.
    fn get_key(&self, alias: &str) -> KeystoreResult<Option<StoredKey>>;

    fn delete_entry(&mut self, alias: &str) -> KeystoreResult<()>;
}

/// Source of store instances for a named secure-hardware backend.
pub trait KeyStoreProvider {
    type Store: SecureKeyStore;

    /// Obtain an unloaded store instance for `provider`.
    fn get_instance(&self, provider: &str) -> KeystoreResult<Self::Store>;
}
