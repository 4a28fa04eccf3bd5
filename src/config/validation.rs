//! Configuration validation.
//!
//! This module provides validation logic for configuration values,
//! ensuring they are within acceptable ranges.

use super::Config;
use crate::error::ConfigError;

/// Maximum allowed per-value length limit.
pub const MAX_VALUE_LENGTH: usize = 100_000;

/// Maximum allowed cache capacity.
pub const MAX_CACHE_SIZE: usize = 1_000_000;

/// Maximum allowed cache TTL in seconds (7 days).
pub const MAX_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;

/// Validate configuration values.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if any value is out of range:
/// - `PROMPT_MAX_LENGTH` must be between 1 and 100000
/// - `PROMPT_CACHE_MAX_SIZE` must be between 1 and 1000000
/// - `PROMPT_CACHE_DEFAULT_TTL_SECS` must be between 1 and 604800
/// - Both risk thresholds must be within [0, 1], warn not above block
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.max_length == 0 || config.max_length > MAX_VALUE_LENGTH {
        return Err(ConfigError::InvalidValue {
            var: "PROMPT_MAX_LENGTH".into(),
            reason: format!("must be between 1 and {MAX_VALUE_LENGTH}"),
        });
    }

    if config.cache_max_size == 0 || config.cache_max_size > MAX_CACHE_SIZE {
        return Err(ConfigError::InvalidValue {
            var: "PROMPT_CACHE_MAX_SIZE".into(),
            reason: format!("must be between 1 and {MAX_CACHE_SIZE}"),
        });
    }

    if config.cache_default_ttl_secs == 0 || config.cache_default_ttl_secs > MAX_CACHE_TTL_SECS {
        return Err(ConfigError::InvalidValue {
            var: "PROMPT_CACHE_DEFAULT_TTL_SECS".into(),
            reason: format!("must be between 1 and {MAX_CACHE_TTL_SECS}"),
        });
    }

    if !(0.0..=1.0).contains(&config.risk_threshold_block) {
        return Err(ConfigError::InvalidValue {
            var: "PROMPT_RISK_THRESHOLD_BLOCK".into(),
            reason: "must be between 0 and 1".into(),
        });
    }

    if !(0.0..=1.0).contains(&config.risk_threshold_warn) {
        return Err(ConfigError::InvalidValue {
            var: "PROMPT_RISK_THRESHOLD_WARN".into(),
            reason: "must be between 0 and 1".into(),
        });
    }

    if config.risk_threshold_warn > config.risk_threshold_block {
        return Err(ConfigError::InvalidValue {
            var: "PROMPT_RISK_THRESHOLD_WARN".into(),
            reason: "must not exceed PROMPT_RISK_THRESHOLD_BLOCK".into(),
        });
    }

    Ok(())
}
