//! Result coordination for a single biometric authentication attempt.
//!
//! A biometric attempt can end through several racing paths: the prompt
//! reports success, failure or a user cancel from a platform thread, the
//! application cancels from its own thread, and key invalidation is signalled
//! internally. [`ResultCoordinator`] turns those into exactly one application
//! outcome.
//!
//! # State Transitions
//!
//! ```text
//! Active ──(success | user cancel | error | app cancel)──▶ Dispatched
//!   │
//!   └─(key unavailable, at most once)──▶ flag only, phase unchanged
//! ```
//!
//! Every transition runs as a task on the attempt's serial dispatcher. Inside
//! the task that moves the attempt to `Dispatched`, the completion sink is
//! notified first and the application callback second.

use crate::dispatcher::{CallbackDispatcher, Task};
use crate::encryptor::BiometricKeyData;
use crate::error::{AuthenticationError, ErrorCode};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

/// Application-facing outcome of an attempt.
pub trait AuthenticationCallback: Send + Sync {
    fn on_success(&self, data: BiometricKeyData);

    /// `user_initiated` is true when the user dismissed the prompt, false when
    /// the application cancelled through the cancel handle.
    fn on_cancelled(&self, user_initiated: bool);

    fn on_failed(&self, error: AuthenticationError);
}

/// Internal notifications for the subsystem that owns the attempt.
pub trait CompletionSink: Send + Sync {
    /// The attempt reached its terminal outcome.
    fn on_completion(&self);

    /// The biometric key can no longer be used.
    fn on_key_unavailable(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Dispatched,
}

/// Bookkeeping for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    phase: Phase,
    key_unavailable_reported: bool,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptState {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Active,
            key_unavailable_reported: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_dispatched(&self) -> bool {
        self.phase == Phase::Dispatched
    }

    pub fn key_unavailable_reported(&self) -> bool {
        self.key_unavailable_reported
    }

    /// Active → Dispatched. Returns false if already dispatched.
    fn try_dispatch(&mut self) -> bool {
        match self.phase {
            Phase::Active => {
                self.phase = Phase::Dispatched;
                true
            }
            Phase::Dispatched => false,
        }
    }

    fn try_report_key_unavailable(&mut self) -> bool {
        if self.is_dispatched() || self.key_unavailable_reported {
            return false;
        }
        self.key_unavailable_reported = true;
        true
    }
}

type CancelListener = Box<dyn FnOnce() + Send>;

struct CancelInner {
    cancelled: AtomicBool,
    listener: Mutex<Option<CancelListener>>,
}

/// Cooperative cancellation token for an in-flight attempt.
///
/// Cancelling does not interrupt the prompt; it decides which eventual result
/// reaches the application.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Mark as cancelled and fire the registered listener. Only the first call has an effect.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let listener = lock(&self.inner.listener).take();
        if let Some(listener) = listener {
            listener();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register the one-shot listener, replacing any previous one.
    ///
    /// Fires immediately if the handle is already cancelled.
    pub fn on_cancel(&self, listener: impl FnOnce() + Send + 'static) {
        *lock(&self.inner.listener) = Some(Box::new(listener));
        if self.is_cancelled() {
            let listener = lock(&self.inner.listener).take();
            if let Some(listener) = listener {
                listener();
            }
        }
    }

    fn clear_listener(&self) {
        let listener = lock(&self.inner.listener).take();
        drop(listener);
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    state: Mutex<AttemptState>,
    callback: Arc<dyn AuthenticationCallback>,
    completion: Arc<dyn CompletionSink>,
    dispatcher: Arc<dyn CallbackDispatcher>,
    cancel: CancelHandle,
    cancel_listener: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl Shared {
    /// Claim the terminal transition. Only one caller ever gets `true`.
    fn try_finish(&self) -> bool {
        let claimed = lock(&self.state).try_dispatch();
        if claimed {
            // Nothing left to cancel.
            self.cancel.clear_listener();
        }
        claimed
    }

    fn finish_cancelled_by_app(&self) {
        if !self.try_finish() {
            return;
        }
        self.completion.on_completion();
        let listener = lock(&self.cancel_listener).take();
        if let Some(mut listener) = listener {
            listener();
        }
        self.callback.on_cancelled(false);
    }
}

/// Weak reference to an attempt.
///
/// The attempt counts as abandoned once every coordinator clone and every
/// queued task for it has been dropped.
#[derive(Clone)]
pub struct AttemptWatch {
    shared: Weak<Shared>,
}

impl AttemptWatch {
    pub fn is_abandoned(&self) -> bool {
        self.shared.strong_count() == 0
    }
}

impl fmt::Debug for AttemptWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptWatch")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// Delivers exactly one outcome of a biometric attempt.
///
/// Cheap to clone; clones refer to the same attempt.
#[derive(Clone)]
pub struct ResultCoordinator {
    shared: Arc<Shared>,
}

impl ResultCoordinator {
    pub fn new(
        callback: Arc<dyn AuthenticationCallback>,
        dispatcher: Arc<dyn CallbackDispatcher>,
        completion: Arc<dyn CompletionSink>,
    ) -> Self {
        let cancel = CancelHandle::new();
        let shared = Arc::new(Shared {
            state: Mutex::new(AttemptState::new()),
            callback,
            completion,
            dispatcher,
            cancel: cancel.clone(),
            cancel_listener: Mutex::new(None),
        });

        // The handle may outlive the attempt; it must not keep it alive.
        let on_cancel = Arc::downgrade(&shared);
        cancel.on_cancel(move || {
            let Some(shared) = on_cancel.upgrade() else {
                debug!("Cancel after attempt was dropped");
                return;
            };
            let task_shared = Arc::clone(&shared);
            shared
                .dispatcher
                .dispatch(Box::new(move || task_shared.finish_cancelled_by_app()));
        });

        Self { shared }
    }

    /// Token the prompt flow and the application use to cancel this attempt.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.shared.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Non-owning view used to tell whether anyone still holds this attempt.
    pub fn watch(&self) -> AttemptWatch {
        AttemptWatch {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Snapshot of the attempt state.
    pub fn state(&self) -> AttemptState {
        *lock(&self.shared.state)
    }

    /// Set the extra listener invoked when the application cancels.
    ///
    /// Replaces any previous listener, e.g. to dismiss an error dialog shown
    /// after a failed retry.
    pub fn set_cancel_listener(&self, listener: impl FnMut() + Send + 'static) {
        *lock(&self.shared.cancel_listener) = Some(Box::new(listener));
    }

    pub fn report_success(&self, data: BiometricKeyData) {
        self.dispatch_outcome(move |callback| callback.on_success(data));
    }

    pub fn report_user_cancel(&self) {
        self.dispatch_outcome(|callback| callback.on_cancelled(true));
    }

    pub fn report_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.report_failure(AuthenticationError::new(code, message));
    }

    pub fn report_failure(&self, error: AuthenticationError) {
        self.dispatch_outcome(move |callback| callback.on_failed(error));
    }

    /// Application-initiated abort; same as cancelling through the handle.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Signal that the biometric key is unusable. Never reaches the application.
    pub fn report_key_unavailable(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.dispatcher.dispatch(Box::new(move || {
            let fire = lock(&shared.state).try_report_key_unavailable();
            if fire {
                debug!("Biometric key reported unavailable");
                shared.completion.on_key_unavailable();
            }
        }));
    }

    /// Run `work` on the dispatcher without touching attempt state.
    pub fn run_on_dispatcher(&self, work: impl FnOnce() + Send + 'static) {
        self.shared.dispatcher.dispatch(Box::new(work));
    }

    fn dispatch_outcome<F>(&self, deliver: F)
    where
        F: FnOnce(&dyn AuthenticationCallback) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let task: Task = Box::new(move || {
            if shared.cancel.is_cancelled() || !shared.try_finish() {
                return;
            }
            shared.completion.on_completion();
            deliver(shared.callback.as_ref());
        });
        self.shared.dispatcher.dispatch(task);
    }
}

impl fmt::Debug for ResultCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCoordinator")
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
