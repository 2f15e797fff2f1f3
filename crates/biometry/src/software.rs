//! Software secure store.
//!
//! An in-process stand-in for a hardware-backed key store, used on hosts
//! without secure hardware and in tests. Entries live in a backend shared
//! between the provider and every store instance it hands out, so a test can
//! drive platform events (enrollment changes, corruption) while a custodian
//! holds the store.

use crate::error::{KeystoreError, KeystoreResult};
use crate::key::{KeyEntry, KeyKind, KeySpec, StoredKey};
use crate::keystore::{KeyStoreProvider, SecureKeyStore};
use keyward_core::DEFAULT_PROVIDER;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum Slot {
    Key(Arc<KeyEntry>),
    Certificate(Vec<u8>),
}

#[derive(Debug, Default)]
struct Backend {
    entries: HashMap<String, Slot>,
    corrupted: bool,
    delete_fails: bool,
    unsupported: HashSet<KeyKind>,
}

type SharedBackend = Arc<Mutex<Backend>>;

fn lock(backend: &SharedBackend) -> MutexGuard<'_, Backend> {
    backend.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Provider registered under one backend name.
#[derive(Debug, Clone)]
pub struct SoftwareKeyStoreProvider {
    name: String,
    backend: SharedBackend,
}

impl Default for SoftwareKeyStoreProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER)
    }
}

impl SoftwareKeyStoreProvider {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        warn!(provider = %name, "STATUS: SoftwareKeyStore :: Hardware Root of Trust :: STUBBED");
        Self {
            name,
            backend: Arc::new(Mutex::new(Backend::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invalidate every key generated with `invalidated_by_biometric_enrollment`.
    ///
    /// Returns the number of keys affected.
    pub fn simulate_enrollment_change(&self) -> usize {
        let backend = lock(&self.backend);
        let mut affected = 0;
        for slot in backend.entries.values() {
            if let Slot::Key(entry) = slot {
                if entry.spec().invalidated_by_biometric_enrollment && !entry.is_invalidated() {
                    entry.invalidate();
                    affected += 1;
                }
            }
        }
        info!(provider = %self.name, affected, "Biometric enrollment changed");
        affected
    }

    /// Make every subsequent `load` fail.
    pub fn set_corrupted(&self, corrupted: bool) {
        lock(&self.backend).corrupted = corrupted;
    }

    pub fn set_delete_fails(&self, fails: bool) {
        lock(&self.backend).delete_fails = fails;
    }

    pub fn set_kind_supported(&self, kind: KeyKind, supported: bool) {
        let mut backend = lock(&self.backend);
        if supported {
            backend.unsupported.remove(&kind);
        } else {
            backend.unsupported.insert(kind);
        }
    }

    /// Place a non-key entry under `alias`.
    pub fn insert_certificate(&self, alias: impl Into<String>, der: Vec<u8>) {
        lock(&self.backend)
            .entries
            .insert(alias.into(), Slot::Certificate(der));
    }

    pub fn entry_count(&self) -> usize {
        lock(&self.backend).entries.len()
    }
}

impl KeyStoreProvider for SoftwareKeyStoreProvider {
    type Store = SoftwareKeyStore;

    fn get_instance(&self, provider: &str) -> KeystoreResult<SoftwareKeyStore> {
        if provider != self.name {
            return Err(KeystoreError::StoreUnavailable(format!(
                "provider '{}' not found",
                provider
            )));
        }
        Ok(SoftwareKeyStore {
            backend: Arc::clone(&self.backend),
            loaded: false,
        })
    }
}

/// Store instance over a shared software backend.
#[derive(Debug)]
pub struct SoftwareKeyStore {
    backend: SharedBackend,
    loaded: bool,
}

impl SoftwareKeyStore {
    fn ensure_loaded(&self) -> KeystoreResult<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(KeystoreError::StoreUnavailable(
                "store has not been loaded".to_string(),
            ))
        }
    }
}

impl SecureKeyStore for SoftwareKeyStore {
    fn load(&mut self) -> KeystoreResult<()> {
        // A failed reload keeps a previously loaded store usable.
        if lock(&self.backend).corrupted {
            return Err(KeystoreError::StoreUnavailable(
                "store integrity check failed".to_string(),
            ));
        }
        self.loaded = true;
        Ok(())
    }

    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool> {
        self.ensure_loaded()?;
        Ok(lock(&self.backend).entries.contains_key(alias))
    }

    fn generate_key(&mut self, alias: &str, spec: KeySpec) -> KeystoreResult<StoredKey> {
        self.ensure_loaded()?;
        let mut backend = lock(&self.backend);
        if backend.unsupported.contains(&spec.kind) {
            return Err(KeystoreError::KeyGenerationFailed {
                alias: alias.to_string(),
                reason: format!("{:?} keys are not supported by this provider", spec.kind),
            });
        }

        let entry = KeyEntry::generate(spec);
        backend
            .entries
            .insert(alias.to_string(), Slot::Key(Arc::clone(&entry)));
        debug!(alias, kind = ?spec.kind, "Generated key");
        Ok(StoredKey::from_entry(entry))
    }

    fn get_key(&self, alias: &str) -> KeystoreResult<Option<StoredKey>> {
        self.ensure_loaded()?;
        let backend = lock(&self.backend);
        match backend.entries.get(alias) {
            None => Ok(None),
            Some(Slot::Certificate(der)) => Ok(Some(StoredKey::Certificate(der.clone()))),
            Some(Slot::Key(entry)) if entry.is_invalidated() => {
                Err(KeystoreError::KeyRetrievalFailed {
                    alias: alias.to_string(),
                    reason: "key permanently invalidated".to_string(),
                })
            }
            Some(Slot::Key(entry)) => Ok(Some(StoredKey::from_entry(Arc::clone(entry)))),
        }
    }

    fn delete_entry(&mut self, alias: &str) -> KeystoreResult<()> {
        self.ensure_loaded()?;
        let mut backend = lock(&self.backend);
        if backend.delete_fails {
            return Err(KeystoreError::KeyDeletionFailed {
                alias: alias.to_string(),
                reason: "entry is locked by the backend".to_string(),
            });
        }
        backend.entries.remove(alias);
        Ok(())
    }
}
