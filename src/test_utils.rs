//! Test utilities and mock factories.
//!
//! This module provides shared testing infrastructure:
//! - Mock implementations for traits
//! - Test fixtures and factories
//! - Common test helpers
//!
//! Only compiled for tests (`#[cfg(test)]`).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use crate::config::Config;
use crate::error::{LoaderError, ProviderError};
use crate::loader::{InMemoryLoader, MockTemplateLoader};
use crate::manager::PromptManager;
use crate::metrics::InMemoryMetrics;
use crate::params::ParameterSet;
use crate::traits::{MockLlmProvider, MockTimeProvider};
use chrono::{DateTime, Utc};

/// Create a mock provider that echoes a fixed completion.
///
/// # Example
///
/// ```ignore
/// let mock = mock_provider_success("Hello!");
/// assert_eq!(mock.complete("prompt").await.unwrap(), "Hello!");
/// ```
#[must_use]
pub fn mock_provider_success(response: impl Into<String>) -> MockLlmProvider {
    let response = response.into();
    let mut mock = MockLlmProvider::new();
    mock.expect_complete()
        .returning(move |_prompt| Ok(response.clone()));
    mock
}

/// Create a mock provider that always fails.
#[must_use]
pub fn mock_provider_error(error: ProviderError) -> MockLlmProvider {
    let mut mock = MockLlmProvider::new();
    mock.expect_complete()
        .returning(move |_prompt| Err(error.clone()));
    mock
}

/// Create a mock loader that serves one body for one path and reports every
/// other path as not found.
#[must_use]
pub fn mock_loader_with(path: impl Into<String>, body: impl Into<String>) -> MockTemplateLoader {
    let path = path.into();
    let body = body.into();
    let mut mock = MockTemplateLoader::new();
    mock.expect_load().returning(move |requested| {
        if requested == path {
            Ok(body.clone())
        } else {
            Err(LoaderError::NotFound {
                path: requested.to_string(),
            })
        }
    });
    mock
}

/// Create a mock time provider that returns a fixed timestamp.
#[must_use]
pub fn mock_time(time: DateTime<Utc>) -> MockTimeProvider {
    let mut mock = MockTimeProvider::new();
    mock.expect_now().return_const(time);
    mock
}

/// Create a mock time provider from an ISO 8601 timestamp string.
///
/// # Panics
///
/// Panics if the timestamp string is invalid.
#[must_use]
pub fn mock_time_str(timestamp: &str) -> MockTimeProvider {
    let time = timestamp
        .parse::<DateTime<Utc>>()
        .expect("Invalid timestamp format");
    mock_time(time)
}

/// In-memory loader with a few common templates.
#[must_use]
pub fn test_loader() -> InMemoryLoader {
    InMemoryLoader::new()
        .with("greeting", "Hello {name}!")
        .with("summary", "Summarize for {audience}:\n{text}")
        .with("context/policy", "Be concise.")
}

/// Manager over [`test_loader`] with in-memory metrics.
#[must_use]
pub fn test_manager() -> (PromptManager, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager =
        PromptManager::new(Config::default(), Arc::new(test_loader())).with_metrics(metrics.clone());
    (manager, metrics)
}

/// Build a parameter set from string pairs.
#[must_use]
pub fn test_params(pairs: &[(&str, &str)]) -> ParameterSet {
    pairs.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::TemplateLoader;
    use crate::security::Escaper;
    use crate::traits::{LlmProvider, TimeProvider};
    use chrono::Datelike;

    #[tokio::test]
    async fn test_mock_provider_success() {
        let mock = mock_provider_success("Test response");
        let result = mock.complete("prompt").await;
        assert_eq!(result.unwrap(), "Test response");
    }

    #[tokio::test]
    async fn test_mock_provider_error() {
        let mock = mock_provider_error(ProviderError::Unavailable {
            message: "Service down".to_string(),
        });
        let result = mock.complete("prompt").await;
        assert!(matches!(result, Err(ProviderError::Unavailable { .. })));
    }

    #[test]
    fn test_mock_loader_with() {
        let mock = mock_loader_with("t", "body");
        assert_eq!(mock.load("t").unwrap(), "body");
        assert!(matches!(
            mock.load("other"),
            Err(LoaderError::NotFound { .. })
        ));
    }

    #[test]
    fn test_mock_time_str() {
        let mock = mock_time_str("2024-01-15T12:00:00Z");
        let now = mock.now();
        assert_eq!(now.year(), 2024);
        assert_eq!(now.month(), 1);
        assert_eq!(now.day(), 15);
    }

    #[test]
    fn test_test_manager_fills_fixture_templates() {
        let (manager, _) = test_manager();
        let prompt = manager
            .fill_template(
                "summary",
                &test_params(&[("audience", "engineers"), ("text", "Rust is fast.")]),
            )
            .unwrap();
        assert_eq!(
            Escaper::strip_delimiters(&prompt),
            "Summarize for engineers:\nRust is fast."
        );
    }

    #[test]
    fn test_test_params() {
        let params = test_params(&[("a", "1"), ("b", "2")]);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("a"), Some(&serde_json::Value::from("1")));
    }
}
