//! Shared doubles for unit tests.

use crate::coordinator::{AuthenticationCallback, CompletionSink};
use crate::encryptor::BiometricKeyData;
use crate::error::AuthenticationError;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Completion,
    KeyUnavailable,
    Success(BiometricKeyData),
    Cancelled { user_initiated: bool },
    Failed(AuthenticationError),
    Listener(&'static str),
}

/// Records callback and completion notifications in one ordered log.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl AuthenticationCallback for Recorder {
    fn on_success(&self, data: BiometricKeyData) {
        self.push(Event::Success(data));
    }

    fn on_cancelled(&self, user_initiated: bool) {
        self.push(Event::Cancelled { user_initiated });
    }

    fn on_failed(&self, error: AuthenticationError) {
        self.push(Event::Failed(error));
    }
}

impl CompletionSink for Recorder {
    fn on_completion(&self) {
        self.push(Event::Completion);
    }

    fn on_key_unavailable(&self) {
        self.push(Event::KeyUnavailable);
    }
}
