//! Key material resident in a secure store, and the handles that refer to it.
//!
//! A [`KeyEntry`] is owned by the store. Callers only ever see it through a
//! [`SymmetricKey`] or [`PrivateKey`] handle, which cannot export the raw
//! material; the only way to use it is through a cipher context.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Symmetric key length in bytes (256 bits).
pub const SYMMETRIC_KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    Symmetric,
    Asymmetric,
}

/// Parameters a store needs to generate a biometry-protected key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub kind: KeyKind,
    /// Private or secret material can only be used after user authentication
    pub user_authentication_required: bool,
    /// Key is permanently invalidated when biometric enrollment changes
    pub invalidated_by_biometric_enrollment: bool,
}

impl KeySpec {
    /// Spec for a key that always requires biometric authentication to unlock.
    pub fn biometric(kind: KeyKind, invalidated_by_biometric_enrollment: bool) -> Self {
        Self {
            kind,
            user_authentication_required: true,
            invalidated_by_biometric_enrollment,
        }
    }
}

pub(crate) enum KeyMaterial {
    Symmetric(Zeroizing<[u8; SYMMETRIC_KEY_LEN]>),
    Asymmetric(p256::SecretKey),
}

/// Store-resident key with its usage policy.
pub struct KeyEntry {
    material: KeyMaterial,
    spec: KeySpec,
    invalidated: AtomicBool,
}

impl KeyEntry {
    /// Generate fresh key material for `spec`.
    pub fn generate(spec: KeySpec) -> Arc<Self> {
        let material = match spec.kind {
            KeyKind::Symmetric => {
                let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
                OsRng.fill_bytes(&mut key[..]);
                KeyMaterial::Symmetric(key)
            }
            KeyKind::Asymmetric => KeyMaterial::Asymmetric(p256::SecretKey::random(&mut OsRng)),
        };
        Arc::new(Self {
            material,
            spec,
            invalidated: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> KeyKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &KeySpec {
        &self.spec
    }

    /// Permanently disable the key. Existing handles stop producing ciphers.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// SEC1 uncompressed public key for asymmetric entries.
    pub fn public_key_sec1(&self) -> Option<Vec<u8>> {
        match &self.material {
            KeyMaterial::Asymmetric(secret) => Some(secret.public_key().to_sec1_bytes().to_vec()),
            KeyMaterial::Symmetric(_) => None,
        }
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("spec", &self.spec)
            .field("invalidated", &self.is_invalidated())
            .finish_non_exhaustive()
    }
}

/// Handle to a secret (symmetric) key.
#[derive(Debug, Clone)]
pub struct SymmetricKey {
    entry: Arc<KeyEntry>,
}

/// Handle to the private half of an asymmetric key pair.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    entry: Arc<KeyEntry>,
}

impl SymmetricKey {
    pub(crate) fn entry(&self) -> &Arc<KeyEntry> {
        &self.entry
    }
}

impl PrivateKey {
    pub(crate) fn entry(&self) -> &Arc<KeyEntry> {
        &self.entry
    }

    pub fn public_key_sec1(&self) -> Option<Vec<u8>> {
        self.entry.public_key_sec1()
    }
}

/// Entry as returned by a store lookup, classified by type.
#[derive(Debug, Clone)]
pub enum StoredKey {
    Secret(SymmetricKey),
    Private(PrivateKey),
    /// Trusted certificate or other non-key entry (DER)
    Certificate(Vec<u8>),
}

impl StoredKey {
    pub fn from_entry(entry: Arc<KeyEntry>) -> Self {
        match entry.kind() {
            KeyKind::Symmetric => StoredKey::Secret(SymmetricKey { entry }),
            KeyKind::Asymmetric => StoredKey::Private(PrivateKey { entry }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StoredKey::Secret(_) => "secret-key",
            StoredKey::Private(_) => "private-key",
            StoredKey::Certificate(_) => "certificate",
        }
    }
}
