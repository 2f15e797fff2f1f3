//! Serial callback dispatch.
//!
//! Every state change of a biometric attempt runs as a task on one
//! [`CallbackDispatcher`]. Implementations must run tasks one at a time in
//! submission order; that ordering is what makes the coordinator's
//! check-and-set atomic across threads.

use keyward_core::DispatcherConfig;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Unit of work executed on the dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serial, FIFO execution context for callbacks.
pub trait CallbackDispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Tokio-backed serial queue drained by a single spawned worker.
#[derive(Debug, Clone)]
pub struct SerialDispatcher {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<Task>,
}

impl SerialDispatcher {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_handle(name, &tokio::runtime::Handle::current())
    }

    /// Spawn the worker named by `config` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(config.name.clone())
    }

    /// Spawn the worker on an explicit runtime.
    pub fn with_handle(name: impl Into<String>, handle: &tokio::runtime::Handle) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_worker(Arc::clone(&name), receiver));
        Self { name, sender }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve once every task submitted before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.dispatch(Box::new(move || {
            let _ = done.send(());
        }));
        if wait.await.is_err() {
            warn!(dispatcher = %self.name, "Dispatcher stopped before flush completed");
        }
    }
}

impl CallbackDispatcher for SerialDispatcher {
    fn dispatch(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!(dispatcher = %self.name, "Dispatcher stopped, task dropped");
        }
    }
}

async fn run_worker(name: Arc<str>, mut receiver: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = receiver.recv().await {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(dispatcher = %name, "Dispatched task panicked");
        }
    }
    debug!(dispatcher = %name, "Dispatcher worker exiting");
}
