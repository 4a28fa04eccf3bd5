//! Cache read-through, expiry and eviction.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{fixture_loader, manager_with, params};
use pretty_assertions::assert_eq;
use prompt_assembler::cache::PromptCache;
use prompt_assembler::config::Config;
use prompt_assembler::error::PromptError;
use prompt_assembler::manager::{PromptManager, PromptRequest, TemplateCall};
use prompt_assembler::metrics::{InMemoryMetrics, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use prompt_assembler::params::{FieldSchema, ParameterSchema, ParameterSet};
use prompt_assembler::traits::ManualTimeProvider;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn cache_on(clock: &Arc<ManualTimeProvider>, max_size: usize, ttl_secs: u64) -> PromptCache {
    PromptCache::new(max_size, Duration::from_secs(ttl_secs)).with_time_provider(clock.clone())
}

#[test]
fn test_set_then_get_until_ttl_elapses() {
    let clock = Arc::new(ManualTimeProvider::default());
    let cache = cache_on(&clock, 8, 60);
    let p = params(&[("name", "World")]);

    cache.set("greeting", &p, "Hello World!", None);
    assert_eq!(cache.get("greeting", &p).as_deref(), Some("Hello World!"));

    clock.advance(Duration::from_secs(60));
    assert_eq!(cache.get("greeting", &p).as_deref(), Some("Hello World!"));

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get("greeting", &p), None);
    assert_eq!(cache.stats().expirations, 1);
}

#[test]
fn test_per_entry_ttl_overrides_default() {
    let clock = Arc::new(ManualTimeProvider::default());
    let cache = cache_on(&clock, 8, 3600);
    let p = ParameterSet::new();

    cache.set("short", &p, "s", Some(Duration::from_secs(5)));
    cache.set("long", &p, "l", None);
    clock.advance(Duration::from_secs(6));

    assert_eq!(cache.get("short", &p), None);
    assert_eq!(cache.get("long", &p).as_deref(), Some("l"));
}

#[test]
fn test_eviction_removes_least_recently_accessed() {
    let clock = Arc::new(ManualTimeProvider::default());
    let cache = cache_on(&clock, 3, 3600);
    let p = ParameterSet::new();

    for id in ["a", "b", "c"] {
        cache.set(id, &p, id, None);
        clock.advance(Duration::from_secs(1));
    }
    // Touch "a" so "b" becomes the oldest access.
    assert!(cache.get("a", &p).is_some());
    clock.advance(Duration::from_secs(1));

    cache.set("d", &p, "d", None);

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.stats().evictions, 1);
    assert!(cache.peek("b", &p).is_none());
    for id in ["a", "c", "d"] {
        assert!(cache.peek(id, &p).is_some(), "{id} should survive");
    }
}

#[test]
fn test_size_never_exceeds_capacity() {
    let cache = PromptCache::new(5, Duration::from_secs(60));
    for i in 0..50 {
        cache.set(&format!("t{i}"), &ParameterSet::new(), "v", None);
        assert!(cache.len() <= 5);
    }
    assert_eq!(cache.stats().evictions, 45);
}

#[test]
fn test_parameter_order_does_not_change_key() {
    let cache = PromptCache::new(8, Duration::from_secs(60));
    let forward: ParameterSet = [("a", "1"), ("b", "2")].into_iter().collect();
    let backward: ParameterSet = [("b", "2"), ("a", "1")].into_iter().collect();

    cache.set("t", &forward, "v", None);
    assert_eq!(cache.get("t", &backward).as_deref(), Some("v"));
}

#[test]
fn test_concurrent_fills_share_one_cache() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager = Arc::new(
        PromptManager::new(Config::default(), fixture_loader()).with_metrics(metrics.clone()),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let name = format!("user{}", i % 2);
                manager
                    .fill_template("greeting", &params(&[("name", name.as_str())]))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = manager.cache_stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.hits + stats.misses, 8);
    assert_eq!(
        metrics.counter(CACHE_HITS_TOTAL, &[]) + metrics.counter(CACHE_MISSES_TOTAL, &[]),
        8
    );
}

#[test]
fn test_manager_read_through_and_invalidate() {
    let (manager, _) = manager_with(Config::default());
    let p = params(&[("name", "World")]);

    let first = manager.fill_template_detailed("greeting", &p).unwrap();
    let second = manager.fill_template_detailed("greeting", &p).unwrap();
    assert!(!first.cached);
    assert!(second.cached);

    assert!(manager.invalidate("greeting", &p));
    let third = manager.fill_template_detailed("greeting", &p).unwrap();
    assert!(!third.cached);
    assert_eq!(third.text, first.text);
}

#[test]
fn test_new_schema_revalidates_cached_requests() {
    let (manager, _) = manager_with(Config::default());
    let request = PromptRequest {
        templates: vec![TemplateCall::new("greeting", params(&[("name", "Alice")]))],
        ..PromptRequest::default()
    };
    manager.build_prompt(&request).unwrap();
    assert_eq!(manager.cache_stats().size, 2);

    manager.register_schema(
        "greeting",
        ParameterSchema::new().field("name", FieldSchema::string().with_max_length(3)),
    );

    let err = manager.build_prompt(&request).unwrap_err();
    assert!(matches!(err, PromptError::Validation { .. }));
    assert_eq!(manager.cache_stats().size, 0);
}
