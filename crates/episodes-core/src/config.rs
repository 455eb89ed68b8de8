//! Engine configuration
//!
//! An [`EngineConfig`] is supplied when the engine is created. It can be built
//! in code, parsed from TOML, or deserialized from a JS object by the browser
//! host.
//!
//! ```toml
//! collector_url = "https://example.com/episodes/beacon"
//! compat_script_url = "https://example.com/episodes-compat.js"
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a single engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// URL the beacon is sent to (the `?ets=` query is appended verbatim)
    pub collector_url: String,
    /// Script injected when the host lacks a message channel
    #[serde(default)]
    pub compat_script_url: Option<String>,
    /// Name of the navigation cookie (default: `EPISODES`)
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Path scope of the navigation cookie (default: `/`)
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,
    /// Episode bracketing an instrumented behavior batch (default: `DrupalBehaviors`)
    #[serde(default = "default_behaviors_label")]
    pub behaviors_label: String,
}

fn default_cookie_name() -> String {
    crate::bridge::COOKIE_NAME.to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_behaviors_label() -> String {
    "DrupalBehaviors".to_string()
}

impl EngineConfig {
    /// Create a configuration with defaults for everything but the collector
    pub fn new(collector_url: impl Into<String>) -> Self {
        Self {
            collector_url: collector_url.into(),
            compat_script_url: None,
            cookie_name: default_cookie_name(),
            cookie_path: default_cookie_path(),
            behaviors_label: default_behaviors_label(),
        }
    }

    /// Set the compatibility shim URL
    pub fn with_compat_script_url(mut self, url: impl Into<String>) -> Self {
        self.compat_script_url = Some(url.into());
        self
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed, `collector_url` is missing,
    /// or a field fails [`validate`](Self::validate).
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector_url.trim().is_empty() {
            return Err(ConfigError::Invalid("collector_url must not be empty".into()));
        }
        let invalid_cookie_char = |c: char| matches!(c, '=' | ';' | ' ' | ',');
        if self.cookie_name.is_empty() || self.cookie_name.contains(invalid_cookie_char) {
            return Err(ConfigError::Invalid(format!(
                "cookie_name is not a valid cookie name: {:?}",
                self.cookie_name
            )));
        }
        if !self.cookie_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "cookie_path must start with '/': {:?}",
                self.cookie_path
            )));
        }
        if self.behaviors_label.is_empty() || self.behaviors_label.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "behaviors_label must be a non-empty name without ':': {:?}",
                self.behaviors_label
            )));
        }
        Ok(())
    }
}
