//! Configuration management.
//!
//! This module handles:
//! - Environment variable loading
//! - Configuration validation
//! - Default value handling
//! - Projection into the [`SecurityConfig`] consumed by the pipeline
//!
//! # Example
//!
//! ```
//! use prompt_assembler::config::Config;
//!
//! // Use Config::from_env() in production
//! let config = Config {
//!     strict_mode: false,
//!     ..Config::default()
//! };
//!
//! assert_eq!(config.max_length, 1000);
//! assert!((config.risk_threshold_block - 0.7).abs() < f64::EPSILON);
//! assert!(!config.security().strict_mode);
//! ```

mod validation;

pub use validation::{
    validate_config, MAX_CACHE_SIZE, MAX_CACHE_TTL_SECS, MAX_VALUE_LENGTH,
};

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::security::{Blocklist, PatternLibrary, RiskAggregation, SecurityConfig};

/// Default template directory.
pub const DEFAULT_TEMPLATE_DIR: &str = "./prompts";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default maximum length of a single parameter value, in characters.
pub const DEFAULT_MAX_LENGTH: usize = 1000;

/// Default maximum number of cached prompts.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 128;

/// Default cache time-to-live in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Default risk score at or above which a value is blocked (strict mode).
pub const DEFAULT_RISK_THRESHOLD_BLOCK: f64 = 0.7;

/// Default risk score at or above which a value is logged as suspicious.
pub const DEFAULT_RISK_THRESHOLD_WARN: f64 = 0.3;

/// Application configuration.
///
/// Use [`Config::from_env`] to load configuration from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root directory of the filesystem template loader.
    pub template_dir: String,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: String,
    /// Maximum characters per parameter value.
    pub max_length: usize,
    /// Block high-risk values instead of warning.
    pub strict_mode: bool,
    /// Run the security pipeline at all.
    pub security_enabled: bool,
    /// Maximum number of cached prompts.
    pub cache_max_size: usize,
    /// Default cache time-to-live in seconds.
    pub cache_default_ttl_secs: u64,
    /// Risk score at or above which a value is blocked.
    pub risk_threshold_block: f64,
    /// Risk score at or above which a value is recorded as suspicious.
    pub risk_threshold_warn: f64,
    /// How multiple triggered rules combine into one score.
    pub risk_aggregation: RiskAggregation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template_dir: DEFAULT_TEMPLATE_DIR.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
            strict_mode: true,
            security_enabled: true,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            cache_default_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            risk_threshold_block: DEFAULT_RISK_THRESHOLD_BLOCK,
            risk_threshold_warn: DEFAULT_RISK_THRESHOLD_WARN,
            risk_aggregation: RiskAggregation::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables (with defaults):
    /// - `PROMPT_TEMPLATE_DIR`: Template root directory (default: `./prompts`)
    /// - `LOG_LEVEL`: Logging level (default: `info`)
    /// - `PROMPT_MAX_LENGTH`: Max characters per value (default: `1000`)
    /// - `PROMPT_STRICT_MODE`: Block high-risk values (default: `true`)
    /// - `PROMPT_SECURITY_ENABLED`: Run the security pipeline (default: `true`)
    /// - `PROMPT_CACHE_MAX_SIZE`: Cache capacity (default: `128`)
    /// - `PROMPT_CACHE_DEFAULT_TTL_SECS`: Cache TTL (default: `3600`)
    /// - `PROMPT_RISK_THRESHOLD_BLOCK`: Block threshold (default: `0.7`)
    /// - `PROMPT_RISK_THRESHOLD_WARN`: Warn threshold (default: `0.3`)
    /// - `PROMPT_RISK_AGGREGATION`: `max`, `weighted_sum` or `noisy_or` (default: `noisy_or`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or any value
    /// fails validation (see [`validate_config`]).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let template_dir =
            std::env::var("PROMPT_TEMPLATE_DIR").unwrap_or_else(|_| DEFAULT_TEMPLATE_DIR.into());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.into());

        let config = Self {
            template_dir,
            log_level,
            max_length: parse_env("PROMPT_MAX_LENGTH", DEFAULT_MAX_LENGTH, "a positive integer")?,
            strict_mode: parse_env_bool("PROMPT_STRICT_MODE", true)?,
            security_enabled: parse_env_bool("PROMPT_SECURITY_ENABLED", true)?,
            cache_max_size: parse_env(
                "PROMPT_CACHE_MAX_SIZE",
                DEFAULT_CACHE_MAX_SIZE,
                "a positive integer",
            )?,
            cache_default_ttl_secs: parse_env(
                "PROMPT_CACHE_DEFAULT_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
                "a positive integer",
            )?,
            risk_threshold_block: parse_env(
                "PROMPT_RISK_THRESHOLD_BLOCK",
                DEFAULT_RISK_THRESHOLD_BLOCK,
                "a number between 0 and 1",
            )?,
            risk_threshold_warn: parse_env(
                "PROMPT_RISK_THRESHOLD_WARN",
                DEFAULT_RISK_THRESHOLD_WARN,
                "a number between 0 and 1",
            )?,
            risk_aggregation: parse_env(
                "PROMPT_RISK_AGGREGATION",
                RiskAggregation::default(),
                "one of max, weighted_sum, noisy_or",
            )?,
        };

        validate_config(&config)?;
        Ok(config)
    }

    /// Default cache time-to-live.
    #[must_use]
    pub const fn cache_default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_default_ttl_secs)
    }

    /// Security settings with the default pattern library and blocklist.
    #[must_use]
    pub fn security(&self) -> SecurityConfig {
        SecurityConfig {
            enabled: self.security_enabled,
            strict_mode: self.strict_mode,
            max_length: self.max_length,
            risk_threshold_block: self.risk_threshold_block,
            risk_threshold_warn: self.risk_threshold_warn,
            aggregation: self.risk_aggregation,
            patterns: PatternLibrary::default(),
            blocklist: Blocklist::default(),
        }
    }
}

/// Parse an environment variable, using a default if not set.
fn parse_env<T: FromStr>(name: &str, default: T, expected: &str) -> Result<T, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        val.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: name.into(),
            reason: format!("must be {expected}"),
        })
    })
}

/// Parse a boolean environment variable, using a default if not set.
fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var: name.into(),
                reason: "must be true or false".into(),
            }),
        }
    })
}
