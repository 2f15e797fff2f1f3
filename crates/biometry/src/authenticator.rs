//! Biometric authentication driver.
//!
//! [`BiometricAuthenticator`] owns the state shared by all attempts: the key
//! custodian (behind a lock), the callback dispatcher, the platform prompt and
//! a single in-flight slot. Each call to [`BiometricAuthenticator::authenticate`]
//! creates a [`ResultCoordinator`] whose completion sink frees the slot and,
//! when the key turns out to be unusable, removes it from the store.

use crate::coordinator::{
    AttemptWatch, AuthenticationCallback, CancelHandle, CompletionSink, ResultCoordinator,
};
use crate::custodian::KeyCustodian;
use crate::dispatcher::CallbackDispatcher;
use crate::encryptor::{CipherContext, CipherDirection, KeyEncryptor};
use crate::error::{AuthenticationError, ErrorCode, KeystoreError};
use crate::keystore::SecureKeyStore;
use keyward_core::KeystoreConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Platform biometric prompt.
///
/// The driver shows its UI, then reports exactly one of
/// [`PromptSession::succeed`], [`PromptSession::user_cancelled`] or
/// [`PromptSession::fail`]. It may do so from any thread.
pub trait BiometricPrompt: Send + Sync {
    fn authenticate(&self, session: PromptSession);
}

#[derive(Clone)]
enum Operation {
    /// Protect a secret with a newly created key
    Register { secret: Zeroizing<Vec<u8>> },
    /// Recover a secret from previously saved data
    Unlock { saved: Vec<u8> },
}

/// What one attempt should do with the biometry key.
#[derive(Clone)]
pub struct AuthenticationRequest {
    operation: Operation,
    invalidate_on_enrollment_change: bool,
    use_symmetric_key: bool,
}

impl AuthenticationRequest {
    pub fn register(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            operation: Operation::Register {
                secret: Zeroizing::new(secret.into()),
            },
            invalidate_on_enrollment_change: true,
            use_symmetric_key: true,
        }
    }

    pub fn unlock(saved: impl Into<Vec<u8>>) -> Self {
        Self {
            operation: Operation::Unlock {
                saved: saved.into(),
            },
            invalidate_on_enrollment_change: true,
            use_symmetric_key: true,
        }
    }

    /// Take key-generation options from configuration.
    pub fn with_config(mut self, config: &KeystoreConfig) -> Self {
        self.invalidate_on_enrollment_change = config.invalidate_on_enrollment_change;
        self.use_symmetric_key = config.use_symmetric_key;
        self
    }

    pub fn invalidate_on_enrollment_change(mut self, invalidate: bool) -> Self {
        self.invalidate_on_enrollment_change = invalidate;
        self
    }

    pub fn use_symmetric_key(mut self, symmetric: bool) -> Self {
        self.use_symmetric_key = symmetric;
        self
    }

    fn direction(&self) -> CipherDirection {
        match self.operation {
            Operation::Register { .. } => CipherDirection::Encrypt,
            Operation::Unlock { .. } => CipherDirection::Decrypt,
        }
    }

    fn input(&self) -> Zeroizing<Vec<u8>> {
        match &self.operation {
            Operation::Register { secret } => secret.clone(),
            Operation::Unlock { saved } => Zeroizing::new(saved.clone()),
        }
    }
}

impl std::fmt::Debug for AuthenticationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationRequest")
            .field("direction", &self.direction())
            .field("invalidate_on_enrollment_change", &self.invalidate_on_enrollment_change)
            .field("use_symmetric_key", &self.use_symmetric_key)
            .finish()
    }
}

/// One attempt as seen by the prompt driver.
pub struct PromptSession {
    cipher: CipherContext,
    input: Zeroizing<Vec<u8>>,
    coordinator: ResultCoordinator,
}

impl PromptSession {
    pub fn cipher(&self) -> &CipherContext {
        &self.cipher
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.coordinator.cancel_handle()
    }

    pub fn is_cancelled(&self) -> bool {
        self.coordinator.is_cancelled()
    }

    /// Replace the listener run when the application cancels the attempt.
    pub fn set_cancel_listener(&self, listener: impl FnMut() + Send + 'static) {
        self.coordinator.set_cancel_listener(listener);
    }

    /// The platform verified the user; run the key operation and report it.
    pub fn succeed(mut self) {
        self.cipher.authorize();
        self.complete();
    }

    pub fn user_cancelled(self) {
        self.coordinator.report_user_cancel();
    }

    pub fn fail(self, code: ErrorCode, message: impl Into<String>) {
        self.coordinator.report_error(code, message);
    }

    fn complete(self) {
        match self.cipher.process(&self.input) {
            Ok(data) => self.coordinator.report_success(data),
            Err(KeystoreError::KeyInvalidated) => {
                self.coordinator.report_key_unavailable();
                self.coordinator
                    .report_failure(KeystoreError::KeyInvalidated.into());
            }
            Err(e) => {
                warn!("Biometric key operation failed: {}", e);
                self.coordinator.report_failure(e.into());
            }
        }
    }
}

impl std::fmt::Debug for PromptSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptSession")
            .field("cipher", &self.cipher)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Completion sink tying an attempt back to the authenticator.
struct AttemptCompletion<S: SecureKeyStore> {
    pending: Arc<Mutex<Option<AttemptWatch>>>,
    custodian: Arc<Mutex<KeyCustodian<S>>>,
}

impl<S: SecureKeyStore + 'static> CompletionSink for AttemptCompletion<S> {
    fn on_completion(&self) {
        lock(&self.pending).take();
        debug!("Biometric attempt completed");
    }

    fn on_key_unavailable(&self) {
        let mut custodian = lock(&self.custodian);
        warn!(alias = %custodian.alias(), "Biometry key unavailable, removing it");
        custodian.remove_key();
    }
}

/// Shared biometric state and entry point for attempts.
pub struct BiometricAuthenticator<S: SecureKeyStore> {
    custodian: Arc<Mutex<KeyCustodian<S>>>,
    dispatcher: Arc<dyn CallbackDispatcher>,
    prompt: Arc<dyn BiometricPrompt>,
    pending: Arc<Mutex<Option<AttemptWatch>>>,
}

impl<S: SecureKeyStore + 'static> BiometricAuthenticator<S> {
    pub fn new(
        custodian: KeyCustodian<S>,
        dispatcher: Arc<dyn CallbackDispatcher>,
        prompt: Arc<dyn BiometricPrompt>,
    ) -> Self {
        Self {
            custodian: Arc::new(Mutex::new(custodian)),
            dispatcher,
            prompt,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn has_biometry_key(&self) -> bool {
        lock(&self.custodian).has_key()
    }

    pub fn remove_biometry_key(&self) {
        lock(&self.custodian).remove_key();
    }

    /// True while an attempt is in flight and someone still holds it.
    pub fn is_authenticating(&self) -> bool {
        lock(&self.pending)
            .as_ref()
            .is_some_and(|attempt| !attempt.is_abandoned())
    }

    /// Start an attempt. The outcome is delivered to `callback` on the dispatcher.
    ///
    /// Fails immediately only when another attempt is still in flight.
    pub fn authenticate(
        &self,
        request: AuthenticationRequest,
        callback: Arc<dyn AuthenticationCallback>,
    ) -> Result<CancelHandle, AuthenticationError> {
        let coordinator = {
            let mut pending = lock(&self.pending);
            if let Some(attempt) = pending.as_ref() {
                if !attempt.is_abandoned() {
                    return Err(AuthenticationError::new(
                        ErrorCode::WrongParameter,
                        "Biometric authentication is already in progress",
                    ));
                }
                warn!("Previous biometric attempt was dropped without a result");
            }
            let completion = Arc::new(AttemptCompletion {
                pending: Arc::clone(&self.pending),
                custodian: Arc::clone(&self.custodian),
            });
            let coordinator =
                ResultCoordinator::new(callback, Arc::clone(&self.dispatcher), completion);
            *pending = Some(coordinator.watch());
            coordinator
        };
        let handle = coordinator.cancel_handle();

        let Some(encryptor) = self.encryptor_for(&request) else {
            if matches!(request.operation, Operation::Unlock { .. }) {
                coordinator.report_key_unavailable();
            }
            coordinator.report_error(
                ErrorCode::BiometryNotAvailable,
                "Biometry key is not available",
            );
            return Ok(handle);
        };

        let cipher = match encryptor.cipher(request.direction()) {
            Ok(cipher) => cipher,
            Err(KeystoreError::KeyInvalidated) => {
                coordinator.report_key_unavailable();
                coordinator.report_failure(KeystoreError::KeyInvalidated.into());
                return Ok(handle);
            }
            Err(e) => {
                coordinator.report_failure(e.into());
                return Ok(handle);
            }
        };

        let session = PromptSession {
            cipher,
            input: request.input(),
            coordinator,
        };
        if session.cipher.needs_authorization() {
            info!(?request, "Showing biometric prompt");
            self.prompt.authenticate(session);
        } else {
            debug!(?request, "Key operation needs no biometric authorization");
            session.complete();
        }
        Ok(handle)
    }

    fn encryptor_for(&self, request: &AuthenticationRequest) -> Option<KeyEncryptor> {
        let mut custodian = lock(&self.custodian);
        match request.operation {
            Operation::Register { .. } => custodian.create_key(
                request.invalidate_on_enrollment_change,
                request.use_symmetric_key,
            ),
            Operation::Unlock { .. } => custodian.get_key_encryptor(),
        }
    }
}

impl<S: SecureKeyStore> std::fmt::Debug for BiometricAuthenticator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricAuthenticator")
            .field("custodian", &*lock(&self.custodian))
            .field("pending", &*lock(&self.pending))
            .finish()
    }
}
