//! Integration tests for the prompt assembler.
//!
//! These tests drive the public API end to end through
//! [`PromptManager`](prompt_assembler::manager::PromptManager) and its
//! collaborators.

mod cache_behavior;
mod composition;
mod error_recovery;
mod security_scenarios;

use prompt_assembler::config::Config;
use prompt_assembler::loader::InMemoryLoader;
use prompt_assembler::manager::PromptManager;
use prompt_assembler::metrics::InMemoryMetrics;
use prompt_assembler::params::ParameterSet;
use std::sync::Arc;

/// Loader with the templates used across the workflow tests.
pub fn fixture_loader() -> Arc<InMemoryLoader> {
    Arc::new(
        InMemoryLoader::new()
            .with("greeting", "Hello {name}!")
            .with("pair", "{a},{b}")
            .with("system", "You are a helpful assistant for {product}.")
            .with("task", "Answer the question: {question}")
            .with("docs/policy", "Never share internal data."),
    )
}

/// Manager over [`fixture_loader`] recording into fresh in-memory metrics.
pub fn manager_with(config: Config) -> (PromptManager, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager = PromptManager::new(config, fixture_loader()).with_metrics(metrics.clone());
    (manager, metrics)
}

/// Parameter set from string pairs.
pub fn params(pairs: &[(&str, &str)]) -> ParameterSet {
    pairs.iter().copied().collect()
}
