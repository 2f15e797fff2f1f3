//! Biometric key encryptor and the cipher contexts it produces.
//!
//! The encryptor is handed to the biometric-prompt flow. The flow decides the
//! direction, builds a [`CipherContext`] and, once the platform has verified
//! the user, authorizes it and runs the operation.
//!
//! # Algorithms
//!
//! - Symmetric: ChaCha20-Poly1305 with a 256-bit key; output is
//!   `nonce || ciphertext || tag`.
//! - Asymmetric: ECIES over P-256. The recipient public key encrypts without
//!   authentication; the BLAKE3-derived one-time key seals the payload with
//!   ChaCha20-Poly1305. Output is `ephemeral_public || ciphertext || tag`.

use crate::error::{KeystoreError, KeystoreResult};
use crate::key::{KeyEntry, KeyKind, KeyMaterial, PrivateKey, SymmetricKey, SYMMETRIC_KEY_LEN};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Nonce size for ChaCha20-Poly1305 (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Poly1305 tag size.
const TAG_SIZE: usize = 16;

/// SEC1 uncompressed P-256 point size.
const EPHEMERAL_PUBLIC_SIZE: usize = 65;

const ECIES_KDF_CONTEXT: &str = "keyward 2024 biometry ecies p256 chacha20poly1305";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherDirection {
    Encrypt,
    Decrypt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    ChaCha20Poly1305,
    EciesP256,
}

/// What a biometric flow needs to set up a cipher for this key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmParameters {
    pub algorithm: Algorithm,
    pub key_size_bits: u16,
    pub nonce_len: usize,
    pub encrypt_requires_authentication: bool,
    pub decrypt_requires_authentication: bool,
}

impl AlgorithmParameters {
    pub fn requires_authentication(&self, direction: CipherDirection) -> bool {
        match direction {
            CipherDirection::Encrypt => self.encrypt_requires_authentication,
            CipherDirection::Decrypt => self.decrypt_requires_authentication,
        }
    }
}

/// Result of a successful biometric-gated key operation.
#[derive(Clone, PartialEq, Eq)]
pub struct BiometricKeyData {
    data_to_save: Vec<u8>,
    derived_data: Zeroizing<Vec<u8>>,
    new_key: bool,
}

impl BiometricKeyData {
    pub fn new(data_to_save: Vec<u8>, derived_data: Vec<u8>, new_key: bool) -> Self {
        Self {
            data_to_save,
            derived_data: Zeroizing::new(derived_data),
            new_key,
        }
    }

    /// Protected form of the secret, to be persisted by the caller.
    pub fn data_to_save(&self) -> &[u8] {
        &self.data_to_save
    }

    /// The secret itself.
    pub fn derived_data(&self) -> &[u8] {
        &self.derived_data
    }

    /// True when produced while registering a freshly created key.
    pub fn is_new_key(&self) -> bool {
        self.new_key
    }
}

impl fmt::Debug for BiometricKeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiometricKeyData")
            .field("data_to_save", &hex::encode(&self.data_to_save))
            .field("derived_data", &"<redacted>")
            .field("new_key", &self.new_key)
            .finish()
    }
}

/// Capability to run biometric-gated operations with the stored key.
#[derive(Debug, Clone)]
pub enum KeyEncryptor {
    Symmetric(SymmetricKey),
    Asymmetric(PrivateKey),
}

impl KeyEncryptor {
    pub fn kind(&self) -> KeyKind {
        match self {
            KeyEncryptor::Symmetric(_) => KeyKind::Symmetric,
            KeyEncryptor::Asymmetric(_) => KeyKind::Asymmetric,
        }
    }

    pub fn algorithm_parameters(&self) -> AlgorithmParameters {
        let auth = self.entry().spec().user_authentication_required;
        match self {
            KeyEncryptor::Symmetric(_) => AlgorithmParameters {
                algorithm: Algorithm::ChaCha20Poly1305,
                key_size_bits: (SYMMETRIC_KEY_LEN * 8) as u16,
                nonce_len: NONCE_SIZE,
                encrypt_requires_authentication: auth,
                decrypt_requires_authentication: auth,
            },
            // Public-key encryption never touches the private half.
            KeyEncryptor::Asymmetric(_) => AlgorithmParameters {
                algorithm: Algorithm::EciesP256,
                key_size_bits: 256,
                nonce_len: 0,
                encrypt_requires_authentication: false,
                decrypt_requires_authentication: auth,
            },
        }
    }

    /// Build an unauthorized cipher context bound to this key.
    pub fn cipher(&self, direction: CipherDirection) -> KeystoreResult<CipherContext> {
        let entry = self.entry();
        if entry.is_invalidated() {
            return Err(KeystoreError::KeyInvalidated);
        }
        Ok(CipherContext {
            direction,
            entry: Arc::clone(entry),
            parameters: self.algorithm_parameters(),
            authorized: false,
        })
    }

    pub fn is_invalidated(&self) -> bool {
        self.entry().is_invalidated()
    }

    fn entry(&self) -> &Arc<KeyEntry> {
        match self {
            KeyEncryptor::Symmetric(key) => key.entry(),
            KeyEncryptor::Asymmetric(key) => key.entry(),
        }
    }
}

/// Operation context handed to the biometric prompt.
pub struct CipherContext {
    direction: CipherDirection,
    entry: Arc<KeyEntry>,
    parameters: AlgorithmParameters,
    authorized: bool,
}

impl CipherContext {
    pub fn direction(&self) -> CipherDirection {
        self.direction
    }

    pub fn parameters(&self) -> &AlgorithmParameters {
        &self.parameters
    }

    pub fn needs_authorization(&self) -> bool {
        self.parameters.requires_authentication(self.direction)
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Called by the prompt driver once the platform has verified the user.
    pub fn authorize(&mut self) {
        self.authorized = true;
    }

    /// Run the operation on `input`.
    ///
    /// Encryption treats `input` as the secret to protect; decryption treats it
    /// as previously saved data.
    pub fn process(&self, input: &[u8]) -> KeystoreResult<BiometricKeyData> {
        if self.entry.is_invalidated() {
            return Err(KeystoreError::KeyInvalidated);
        }
        if self.needs_authorization() && !self.authorized {
            return Err(KeystoreError::NotAuthorized);
        }

        match (self.entry.material(), self.direction) {
            (KeyMaterial::Symmetric(key), CipherDirection::Encrypt) => {
                let saved = seal_symmetric(&key[..], input)?;
                Ok(BiometricKeyData::new(saved, input.to_vec(), true))
            }
            (KeyMaterial::Symmetric(key), CipherDirection::Decrypt) => {
                let secret = open_symmetric(&key[..], input)?;
                Ok(BiometricKeyData::new(input.to_vec(), secret.to_vec(), false))
            }
            (KeyMaterial::Asymmetric(secret), CipherDirection::Encrypt) => {
                let saved = seal_ecies(&secret.public_key(), input)?;
                Ok(BiometricKeyData::new(saved, input.to_vec(), true))
            }
            (KeyMaterial::Asymmetric(secret), CipherDirection::Decrypt) => {
                let plain = open_ecies(secret, input)?;
                Ok(BiometricKeyData::new(input.to_vec(), plain.to_vec(), false))
            }
        }
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("direction", &self.direction)
            .field("algorithm", &self.parameters.algorithm)
            .field("authorized", &self.authorized)
            .finish()
    }
}

fn seal_symmetric(key: &[u8], plaintext: &[u8]) -> KeystoreResult<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| KeystoreError::Crypto(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_symmetric(key: &[u8], sealed: &[u8]) -> KeystoreResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(KeystoreError::Crypto("ciphertext too short".to_string()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| KeystoreError::Crypto("decryption failed: authentication tag mismatch".into()))
}

fn ecies_key(shared: &[u8], ephemeral: &[u8], recipient: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(ECIES_KDF_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    Zeroizing::new(*hasher.finalize().as_bytes())
}

fn seal_ecies(recipient: &p256::PublicKey, plaintext: &[u8]) -> KeystoreResult<Vec<u8>> {
    let ephemeral = p256::ecdh::EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key().to_sec1_bytes();
    let recipient_public = recipient.to_sec1_bytes();
    let shared = ephemeral.diffie_hellman(recipient);

    let key = ecies_key(
        shared.raw_secret_bytes().as_slice(),
        &ephemeral_public,
        &recipient_public,
    );
    // The derived key is single-use, so a fixed nonce is safe.
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&[0u8; NONCE_SIZE]), plaintext)
        .map_err(|e| KeystoreError::Crypto(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(EPHEMERAL_PUBLIC_SIZE + ciphertext.len());
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_ecies(secret: &p256::SecretKey, sealed: &[u8]) -> KeystoreResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < EPHEMERAL_PUBLIC_SIZE + TAG_SIZE {
        return Err(KeystoreError::Crypto("ciphertext too short".to_string()));
    }
    let (ephemeral_public, ciphertext) = sealed.split_at(EPHEMERAL_PUBLIC_SIZE);
    let ephemeral = p256::PublicKey::from_sec1_bytes(ephemeral_public)
        .map_err(|_| KeystoreError::Crypto("invalid ephemeral public key".to_string()))?;
    let recipient_public = secret.public_key().to_sec1_bytes();
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());

    let key = ecies_key(
        shared.raw_secret_bytes().as_slice(),
        ephemeral_public,
        &recipient_public,
    );
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    cipher
        .decrypt(Nonce::from_slice(&[0u8; NONCE_SIZE]), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| KeystoreError::Crypto("decryption failed: authentication tag mismatch".into()))
}
