//! Core functionality shared by the Keyward crates.
//!
//! This crate provides the error type, configuration model and logging
//! setup used across the workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DispatcherConfig, KeystoreConfig, DEFAULT_KEY_ALIAS, DEFAULT_PROVIDER};
pub use error::{Error, Result};
