//! Custodian of the biometry-protected key.
//!
//! The custodian manages exactly one entry, identified by the configured
//! alias, inside a secure store. "No key present" is a normal steady state:
//! every store failure is logged and reported as an empty or false result,
//! never raised to the caller.
//!
//! The custodian does not synchronize itself. Callers sharing one instance
//! across threads wrap it in a lock (see `BiometricAuthenticator`).

use crate::encryptor::KeyEncryptor;
use crate::error::KeystoreResult;
use crate::key::{KeyKind, KeySpec, StoredKey};
use crate::keystore::{KeyStoreProvider, SecureKeyStore};
use keyward_core::KeystoreConfig;
use tracing::{debug, error, info};

pub struct KeyCustodian<S: SecureKeyStore> {
    store: Option<S>,
    alias: String,
    provider: String,
}

impl<S: SecureKeyStore> KeyCustodian<S> {
    /// Obtain and load the store named by `config.provider`.
    ///
    /// Failures leave the custodian in the not-ready state.
    pub fn new<P>(config: &KeystoreConfig, provider: &P) -> Self
    where
        P: KeyStoreProvider<Store = S>,
    {
        let store = match Self::open_store(provider, &config.provider) {
            Ok(store) => {
                info!(alias = %config.alias, provider = %config.provider, "Key custodian ready");
                Some(store)
            }
            Err(e) => {
                error!(provider = %config.provider, "Key custodian construction failed: {}", e);
                None
            }
        };

        Self {
            store,
            alias: config.alias.clone(),
            provider: config.provider.clone(),
        }
    }

    fn open_store<P>(provider: &P, name: &str) -> KeystoreResult<S>
    where
        P: KeyStoreProvider<Store = S>,
    {
        let mut store = provider.get_instance(name)?;
        store.load()?;
        Ok(store)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_some()
    }

    pub fn has_key(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.contains_alias(&self.alias) {
            Ok(present) => present,
            Err(e) => {
                error!(alias = %self.alias, "Key lookup failed: {}", e);
                false
            }
        }
    }

    /// Replace the managed entry with a freshly generated key.
    pub fn create_key(
        &mut self,
        invalidate_on_enrollment_change: bool,
        use_symmetric: bool,
    ) -> Option<KeyEncryptor> {
        if !self.is_ready() {
            return None;
        }
        self.remove_key();

        let kind = if use_symmetric {
            KeyKind::Symmetric
        } else {
            KeyKind::Asymmetric
        };
        let spec = KeySpec::biometric(kind, invalidate_on_enrollment_change);
        let store = self.store.as_mut()?;

        match store.generate_key(&self.alias, spec) {
            Ok(stored) => {
                info!(alias = %self.alias, ?kind, invalidate_on_enrollment_change, "Created biometry key");
                self.classify(stored)
            }
            Err(e) => {
                error!(alias = %self.alias, ?kind, "Key generation failed: {}", e);
                None
            }
        }
    }

    /// Delete the managed entry if present. Best-effort.
    pub fn remove_key(&mut self) {
        if !self.has_key() {
            return;
        }
        let Some(store) = self.store.as_mut() else {
            return;
        };
        match store.delete_entry(&self.alias) {
            Ok(()) => info!(alias = %self.alias, "Removed biometry key"),
            Err(e) => error!(alias = %self.alias, "Key removal failed: {}", e),
        }
    }

    /// Fetch the managed key as an encryptor of the matching variant.
    pub fn get_key_encryptor(&mut self) -> Option<KeyEncryptor> {
        let store = self.store.as_mut()?;
        let fetched = store.load().and_then(|_| store.get_key(&self.alias));
        match fetched {
            Ok(Some(stored)) => self.classify(stored),
            Ok(None) => {
                debug!(alias = %self.alias, "No biometry key present");
                None
            }
            Err(e) => {
                error!(alias = %self.alias, "Key retrieval failed: {}", e);
                None
            }
        }
    }

    fn classify(&self, stored: StoredKey) -> Option<KeyEncryptor> {
        match stored {
            StoredKey::Secret(key) => Some(KeyEncryptor::Symmetric(key)),
            StoredKey::Private(key) => Some(KeyEncryptor::Asymmetric(key)),
            other => {
                error!(alias = %self.alias, "Unknown key type: {}", other.type_name());
                None
            }
        }
    }
}

impl<S: SecureKeyStore> std::fmt::Debug for KeyCustodian<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCustodian")
            .field("ready", &self.is_ready())
            .field("alias", &self.alias)
            .field("provider", &self.provider)
            .finish()
    }
}
