//! Multi-template composition workflows.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{manager_with, params};
use pretty_assertions::assert_eq;
use prompt_assembler::composer::{CompositionStrategy, DEFAULT_SEPARATOR};
use prompt_assembler::config::Config;
use prompt_assembler::manager::{PromptRequest, TemplateCall};
use prompt_assembler::security::Escaper;
use test_case::test_case;

#[test]
fn test_sequential_two_parts() {
    let (manager, _) = manager_with(Config::default());
    let out = manager
        .compose(
            &["A".to_string(), "B".to_string()],
            CompositionStrategy::Sequential,
        )
        .unwrap();
    assert_eq!(out, "A\n---\nB");
    assert_eq!(out, format!("A{DEFAULT_SEPARATOR}B"));
}

#[test_case(CompositionStrategy::Sequential ; "sequential")]
#[test_case(CompositionStrategy::Parallel ; "parallel")]
#[test_case(CompositionStrategy::Hierarchical ; "hierarchical")]
fn test_single_part_is_unchanged(strategy: CompositionStrategy) {
    let (manager, _) = manager_with(Config::default());
    let part = "Only part\nwith two lines".to_string();
    assert_eq!(
        manager.compose(std::slice::from_ref(&part), strategy).unwrap(),
        part
    );
}

#[test]
fn test_parallel_labels_sections() {
    let (manager, _) = manager_with(Config::default());
    let out = manager
        .compose(
            &["first".to_string(), "second".to_string()],
            CompositionStrategy::Parallel,
        )
        .unwrap();
    assert_eq!(out, "## Section 1\nfirst\n\n## Section 2\nsecond");
}

#[test]
fn test_build_prompt_system_task_and_policy() {
    let (manager, _) = manager_with(Config::default());
    let request = PromptRequest {
        templates: vec![
            TemplateCall::new("system", params(&[("product", "Acme DB")])),
            TemplateCall::new("task", params(&[("question", "How do I back up?")])),
        ],
        context: vec!["docs/policy".to_string()],
        strategy: CompositionStrategy::Sequential,
    };

    let out = manager.build_prompt(&request).unwrap();
    assert_eq!(
        Escaper::strip_delimiters(&out),
        "You are a helpful assistant for Acme DB.\n---\n\
         Answer the question: How do I back up?\n---\n\
         Never share internal data."
    );
}

#[test]
fn test_build_prompt_hierarchical_titles_context() {
    let (manager, _) = manager_with(Config::default());
    let request = PromptRequest {
        templates: vec![TemplateCall::new(
            "system",
            params(&[("product", "Acme DB")]),
        )],
        context: vec!["docs/policy".to_string()],
        strategy: CompositionStrategy::Hierarchical,
    };

    let out = Escaper::strip_delimiters(&manager.build_prompt(&request).unwrap());
    assert_eq!(
        out,
        "You are a helpful assistant for Acme DB.\n\n## Additional Context\n\n### docs/policy\nNever share internal data."
    );
}

#[test]
fn test_build_prompt_is_cached_per_request() {
    let (manager, _) = manager_with(Config::default());
    let request = |name: &str| PromptRequest {
        templates: vec![TemplateCall::new("greeting", params(&[("name", name)]))],
        context: Vec::new(),
        strategy: CompositionStrategy::Sequential,
    };

    let a = manager.build_prompt(&request("A")).unwrap();
    let b = manager.build_prompt(&request("B")).unwrap();
    assert_ne!(a, b);

    let hits = manager.cache_stats().hits;
    assert_eq!(manager.build_prompt(&request("A")).unwrap(), a);
    assert_eq!(manager.cache_stats().hits, hits + 1);
}
