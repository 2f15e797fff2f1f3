//! Configuration management for Keyward.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Alias of the biometry-protected entry when none is configured.
pub const DEFAULT_KEY_ALIAS: &str = "keyward.BiometryKeychain.DefaultKey";

/// Secure-hardware backend requested when none is configured.
pub const DEFAULT_PROVIDER: &str = "AndroidKeyStore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Identifies the single key entry a custodian manages and how new keys are made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Name of the managed entry within the secure store
    pub alias: String,
    /// Secure-hardware backend identifier
    pub provider: String,
    /// New keys are invalidated when the set of enrolled biometrics changes
    pub invalidate_on_enrollment_change: bool,
    /// Generate a symmetric key instead of an asymmetric key pair
    pub use_symmetric_key: bool,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            alias: DEFAULT_KEY_ALIAS.to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            invalidate_on_enrollment_change: true,
            use_symmetric_key: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name attached to log events emitted by the callback queue
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "biometry-callbacks".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            keystore: KeystoreConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }

    /// Reject configurations no custodian could work with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.keystore.alias.trim().is_empty() {
            return Err(crate::Error::Config(
                "keystore.alias must not be empty".to_string(),
            ));
        }
        if self.keystore.provider.trim().is_empty() {
            return Err(crate::Error::Config(
                "keystore.provider must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
