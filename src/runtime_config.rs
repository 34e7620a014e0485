//! # Runtime Configuration Module
//!
//! Limits and timeouts that govern how request content is consumed.
//!
//! ## Overview
//!
//! Configuration comes from three layers, later layers winning:
//!
//! 1. Built-in defaults ([`RuntimeConfig::default`])
//! 2. An optional YAML file ([`RuntimeConfig::from_yaml_file`])
//! 3. `REQSCOPE_*` environment variables ([`RuntimeConfig::apply_env`])
//!
//! ## Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `REQSCOPE_MAX_FORM_CONTENT_SIZE` | `max_form_content_size` | `200000` |
//! | `REQSCOPE_MAX_FORM_KEYS` | `max_form_keys` | `1000` |
//! | `REQSCOPE_BLOCKING_READ_TIMEOUT_MS` | `blocking_read_timeout_ms` | `30000` |
//! | `REQSCOPE_FORM_ENCODED_METHODS` | `form_encoded_methods` | `POST,PUT` |
//! | `REQSCOPE_DEFAULT_READER_CHARSET` | `default_reader_charset` | `ISO-8859-1` |
//!
//! Numeric values accept decimal or `0x` hexadecimal. Unparseable values are ignored
//! and the previous layer's value is kept.
//!
//! ## Usage
//!
//! ```rust
//! use reqscope::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! assert!(config.max_form_keys > 0);
//! ```
//!
//! ## Example YAML
//!
//! ```yaml
//! max_form_content_size: 1048576
//! blocking_read_timeout_ms: 5000
//! form_encoded_methods: [POST, PUT, PATCH]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Runtime configuration for request content handling.
///
/// Load this at startup and hand it to each [`crate::request::ConnectionSlot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Largest form body (bytes) that will be parsed into parameters
    pub max_form_content_size: usize,
    /// Largest number of keys accepted in a form body
    pub max_form_keys: usize,
    /// How long a blocking read waits for content before timing out
    pub blocking_read_timeout_ms: u64,
    /// Methods whose form bodies are parsed into parameters
    pub form_encoded_methods: Vec<String>,
    /// Charset used by the character reader when the request declares none
    pub default_reader_charset: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_form_content_size: 200_000,
            max_form_keys: 1000,
            blocking_read_timeout_ms: 30_000,
            form_encoded_methods: vec!["POST".to_string(), "PUT".to_string()],
            default_reader_charset: "ISO-8859-1".to_string(),
        }
    }
}

fn parse_number<T>(val: &str) -> Option<T>
where
    T: std::str::FromStr + TryFrom<u64>,
{
    let val = val.trim();
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)
            .ok()
            .and_then(|v| T::try_from(v).ok()),
        None => val.parse().ok(),
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse YAML configuration. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RuntimeConfig =
            serde_yaml::from_str(yaml).context("Failed to parse runtime config YAML")?;
        Ok(config)
    }

    /// Load a YAML file, then apply environment overrides.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read runtime config {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `REQSCOPE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(v) = env::var("REQSCOPE_MAX_FORM_CONTENT_SIZE")
            .ok()
            .and_then(|v| parse_number(&v))
        {
            self.max_form_content_size = v;
        }
        if let Some(v) = env::var("REQSCOPE_MAX_FORM_KEYS")
            .ok()
            .and_then(|v| parse_number(&v))
        {
            self.max_form_keys = v;
        }
        if let Some(v) = env::var("REQSCOPE_BLOCKING_READ_TIMEOUT_MS")
            .ok()
            .and_then(|v| parse_number(&v))
        {
            self.blocking_read_timeout_ms = v;
        }
        if let Ok(v) = env::var("REQSCOPE_FORM_ENCODED_METHODS") {
            let methods: Vec<String> = v
                .split(',')
                .map(|m| m.trim().to_ascii_uppercase())
                .filter(|m| !m.is_empty())
                .collect();
            if !methods.is_empty() {
                self.form_encoded_methods = methods;
            }
        }
        if let Ok(v) = env::var("REQSCOPE_DEFAULT_READER_CHARSET") {
            if !v.trim().is_empty() {
                self.default_reader_charset = v.trim().to_string();
            }
        }
    }

    /// Blocking read timeout as a [`Duration`]
    #[must_use]
    pub fn blocking_read_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_read_timeout_ms)
    }

    /// True if form bodies sent with `method` should be parsed
    #[must_use]
    pub fn is_form_encoded_method(&self, method: &str) -> bool {
        self.form_encoded_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }
}
