//! Structured logging infrastructure for Keyward.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use tracing_subscriber::{
    fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use keyward_core::logging;
///
/// logging::init();
/// tracing::info!("Biometry subsystem started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// JSON subscriber with event fields (`alias`, `provider`, ...) flattened to
/// the top level of each record.
fn json_subscriber<W>(
    filter: EnvFilter,
    writer: W,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(writer),
    )
}

/// Initialize the logging system with JSON output for production environments.
///
/// # Example
/// ```no_run
/// use keyward_core::logging;
///
/// logging::init_json();
/// tracing::info!(alias = "keyward.BiometryKeychain.DefaultKey", "Custodian ready");
/// ```
pub fn init_json() {
    json_subscriber(env_filter(), std::io::stdout).init();
}

/// Install a test-friendly subscriber; repeated calls are ignored.
pub fn try_init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}
