//! Configuration management for llm-observer
//!
//! Supports configuration via:
//! 1. Config file (~/.config/llm-observer/config.toml)
//! 2. Environment variables (LLM_OBSERVER_ENABLED, LLM_OBSERVER_API_KEY, etc.)
//! 3. The builder, for programmatic use
//!
//! Invalid values never fail startup: they fall back to the documented
//! defaults when the configuration is normalized.

use crate::cache::DEFAULT_HISTORY_SIZE;
use crate::privacy::{PrivacyMode, RedactionMode};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix shared by every environment variable
pub const ENV_PREFIX: &str = "LLM_OBSERVER_";

const DEFAULT_SAMPLING_RATE: f64 = 1.0;
const DEFAULT_QUEUE_SIZE: usize = 256;
const DEFAULT_TIMEOUT_SECONDS: f64 = 2.0;
const MIN_TIMEOUT_SECONDS: f64 = 0.1;
const DEFAULT_RETRY_BUDGET: u32 = 3;
const DEFAULT_SAVINGS_FACTOR: f64 = 0.3;
const DEFAULT_SAVINGS_MIN_SIMILARITY: f64 = 0.15;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Observer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Whether remote telemetry is enabled at all
    pub enabled: bool,

    /// Collector API key (can also use LLM_OBSERVER_API_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Collector endpoint URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Fraction of events sent to the collector (0.0 - 1.0)
    pub sampling_rate: f64,

    #[serde(deserialize_with = "lenient_privacy_mode")]
    pub privacy_mode: PrivacyMode,

    #[serde(deserialize_with = "lenient_redaction_mode")]
    pub redaction_mode: RedactionMode,

    /// Second opt-in required before any redacted snippet is attached
    pub snippets_enabled: bool,

    /// Capacity of the telemetry queue
    pub queue_size: usize,

    /// Per-request network timeout in seconds
    pub timeout_seconds: f64,

    /// Retries after the first failed delivery attempt
    pub retry_budget: u32,

    /// Models remembered by the prefix tracker
    pub history_size: usize,

    /// Share of a similar prompt's cost assumed recoverable by caching (0.0 - 1.0)
    pub savings_factor: f64,

    /// Similarity below which no savings are estimated (0.0 - 1.0)
    pub savings_min_similarity: f64,

    /// Pricing catalog file; the bundled catalog is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_path: Option<PathBuf>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            endpoint: None,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            privacy_mode: PrivacyMode::HashOnly,
            redaction_mode: RedactionMode::Strict,
            snippets_enabled: false,
            queue_size: DEFAULT_QUEUE_SIZE,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            retry_budget: DEFAULT_RETRY_BUDGET,
            history_size: DEFAULT_HISTORY_SIZE,
            savings_factor: DEFAULT_SAVINGS_FACTOR,
            savings_min_similarity: DEFAULT_SAVINGS_MIN_SIMILARITY,
            pricing_path: None,
        }
    }
}

fn lenient_privacy_mode<'de, D: Deserializer<'de>>(d: D) -> Result<PrivacyMode, D::Error> {
    let raw = String::deserialize(d)?;
    Ok(PrivacyMode::parse_lenient(&raw))
}

fn lenient_redaction_mode<'de, D: Deserializer<'de>>(d: D) -> Result<RedactionMode, D::Error> {
    let raw = String::deserialize(d)?;
    Ok(RedactionMode::parse_lenient(&raw))
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Clamp to [0, 1], replacing non-finite values with `default`
fn unit_interval(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        default
    }
}

impl ObserverConfig {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("llm-observer")
            .join("config.toml")
    }

    /// Load config from default location, then apply the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load config from specific path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        Ok(config.with_env_overrides().normalized())
    }

    /// Configuration from defaults and the environment only
    pub fn from_env() -> Self {
        Self::default().with_env_overrides().normalized()
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any `LLM_OBSERVER_*` style lookup.
    ///
    /// Values that fail to parse are ignored, keeping the current setting.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));
        fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|v| v.trim().parse().ok())
        }

        if let Some(raw) = get("ENABLED") {
            self.enabled = parse_bool(&raw);
        }
        if let Some(key) = get("API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(endpoint) = get("ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(rate) = parsed(get("SAMPLING_RATE")) {
            self.sampling_rate = rate;
        }
        if let Some(mode) = get("PRIVACY_MODE") {
            self.privacy_mode = PrivacyMode::parse_lenient(&mode);
        }
        if let Some(mode) = get("REDACTION_MODE") {
            self.redaction_mode = RedactionMode::parse_lenient(&mode);
        }
        if let Some(raw) = get("SNIPPETS_ENABLED") {
            self.snippets_enabled = parse_bool(&raw);
        }
        if let Some(size) = parsed(get("QUEUE_SIZE")) {
            self.queue_size = size;
        }
        if let Some(timeout) = parsed(get("TIMEOUT_SECONDS")) {
            self.timeout_seconds = timeout;
        }
        if let Some(budget) = parsed(get("RETRY_BUDGET")) {
            self.retry_budget = budget;
        }
        if let Some(size) = parsed(get("HISTORY_SIZE")) {
            self.history_size = size;
        }
        if let Some(factor) = parsed(get("SAVINGS_FACTOR")) {
            self.savings_factor = factor;
        }
        if let Some(floor) = parsed(get("SAVINGS_MIN_SIMILARITY")) {
            self.savings_min_similarity = floor;
        }
        if let Some(path) = get("PRICING_PATH") {
            self.pricing_path = Some(PathBuf::from(path));
        }

        self
    }

    /// Clamp every value into its valid range.
    ///
    /// In local-only mode the API key, endpoint and snippet opt-in are
    /// forced off regardless of what was configured.
    pub fn normalized(mut self) -> Self {
        self.sampling_rate = unit_interval(self.sampling_rate, DEFAULT_SAMPLING_RATE);
        self.savings_factor = unit_interval(self.savings_factor, DEFAULT_SAVINGS_FACTOR);
        self.savings_min_similarity =
            unit_interval(self.savings_min_similarity, DEFAULT_SAVINGS_MIN_SIMILARITY);
        self.queue_size = self.queue_size.max(1);
        self.history_size = self.history_size.max(1);
        self.timeout_seconds = if self.timeout_seconds.is_finite() {
            self.timeout_seconds.max(MIN_TIMEOUT_SECONDS)
        } else {
            DEFAULT_TIMEOUT_SECONDS
        };

        if self.local_only() {
            self.api_key = None;
            self.endpoint = None;
            self.snippets_enabled = false;
        }

        self
    }

    /// True unless telemetry is enabled with both an API key and an endpoint
    pub fn local_only(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        !(self.enabled && present(&self.api_key) && present(&self.endpoint))
    }

    /// Network timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds.max(MIN_TIMEOUT_SECONDS))
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS))
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Generate example config content
    pub fn example() -> String {
        toml::to_string_pretty(&ObserverConfig::default()).unwrap_or_default()
    }
}

/// Builder for creating an [`ObserverConfig`] programmatically
pub struct ConfigBuilder {
    config: ObserverConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ObserverConfig::default(),
        }
    }

    /// Enable remote telemetry to `endpoint`, authenticated with `api_key`
    pub fn telemetry(mut self, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.config.enabled = true;
        self.config.endpoint = Some(endpoint.into());
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn sampling_rate(mut self, rate: f64) -> Self {
        self.config.sampling_rate = rate;
        self
    }

    pub fn redacted_snippets(mut self, enabled: bool) -> Self {
        self.config.redaction_mode = RedactionMode::RedactedSnippets;
        self.config.snippets_enabled = enabled;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    pub fn timeout_seconds(mut self, seconds: f64) -> Self {
        self.config.timeout_seconds = seconds;
        self
    }

    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.config.retry_budget = budget;
        self
    }

    pub fn history_size(mut self, size: usize) -> Self {
        self.config.history_size = size;
        self
    }

    pub fn savings(mut self, factor: f64, min_similarity: f64) -> Self {
        self.config.savings_factor = factor;
        self.config.savings_min_similarity = min_similarity;
        self
    }

    pub fn pricing_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pricing_path = Some(path.into());
        self
    }

    /// Finish, normalizing out-of-range values
    pub fn build(self) -> ObserverConfig {
        self.config.normalized()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
