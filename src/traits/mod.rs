//! Trait definitions for injectable dependencies.
//!
//! This module defines traits for:
//! - [`TimeProvider`]: Time abstraction so cache expiry can run on a simulated clock
//! - [`LlmProvider`]: The downstream model the assembled prompt is handed to
//!
//! # Mocking
//!
//! Both traits are annotated with `#[cfg_attr(test, mockall::automock)]`
//! which generates mock implementations automatically for testing.
//!
//! # Example
//!
//! ```
//! use prompt_assembler::traits::{ManualTimeProvider, TimeProvider};
//! use std::time::Duration;
//!
//! let clock = ManualTimeProvider::default();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(90));
//! assert_eq!((clock.now() - start).num_seconds(), 90);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::ProviderError;

/// Downstream language model.
///
/// The assembler only forwards the final prompt string; request shaping and
/// transport belong to the implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a fully assembled prompt and return the completion text.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider is unreachable or rejects
    /// the prompt.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Time provider trait for mocking.
///
/// This trait abstracts time operations so cache expiry can be tested
/// deterministically.
#[cfg_attr(test, mockall::automock)]
pub trait TimeProvider: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

impl std::fmt::Debug for dyn TimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TimeProvider")
    }
}

/// Real time provider using system clock.
///
/// This is the production implementation that returns the actual current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualTimeProvider {
    now: RwLock<DateTime<Utc>>,
}

impl ManualTimeProvider {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        match self.now.write() {
            Ok(mut now) => *now += delta,
            Err(poison_error) => {
                tracing::error!(error = %poison_error, "Failed to advance clock: RwLock poisoned");
            }
        }
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = to;
        }
    }
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(now) => *now,
            Err(poison_error) => *poison_error.into_inner(),
        }
    }
}
