use std::time::Duration;

use regex::Regex;
use resource_layer::cache::{CacheConfig, CacheEvent, CacheManager, CommandCacheConfig, CommandResultCache, InvalidationStrategy};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    id: u32,
    title: String,
    status: String,
}

fn small_cache(max_entries: usize) -> CacheManager {
    CacheManager::new(CacheConfig {
        max_entries,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_lru_capacity_five() -> anyhow::Result<()> {
    let cache = small_cache(5);
    for key in ["a", "b", "c", "d", "e"] {
        cache.set(key, &key.to_string(), None)?;
    }

    // Touching "a" makes "b" the least recently used entry
    let a: Option<String> = cache.get("a");
    assert_eq!(a.as_deref(), Some("a"));

    let mut events = cache.subscribe();
    cache.set("f", &"f".to_string(), None)?;

    assert!(!cache.contains_key("b"));
    assert!(cache.contains_key("a"));
    assert!(cache.contains_key("f"));
    assert_eq!(cache.len(), 5);
    assert_eq!(events.recv().await?, CacheEvent::Evicted { key: "b".to_string() });
    assert_eq!(cache.statistics().evictions, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() -> anyhow::Result<()> {
    let cache = small_cache(10);
    let task = Task {
        id: 1,
        title: "Write parser".to_string(),
        status: "pending".to_string(),
    };
    cache.set("task:1", &task, Some(Duration::from_millis(100)))?;

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(cache.get::<Task>("task:1"), Some(task));

    tokio::time::advance(Duration::from_millis(51)).await;
    assert_eq!(cache.get::<Task>("task:1"), None);

    let stats = cache.statistics();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.entry_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_pattern_invalidation_counts_matches() -> anyhow::Result<()> {
    let cache = small_cache(100);
    for id in 0..4 {
        cache.set(&format!("user:{}:profile", id), &id, None)?;
    }
    cache.set("session:1", &1, None)?;

    let removed = cache.invalidate(&InvalidationStrategy::Pattern(Regex::new(r"^user:\d+:profile$")?));
    assert_eq!(removed, 4);
    assert_eq!(cache.keys(), vec!["session:1".to_string()]);
    assert_eq!(cache.statistics().invalidations, 4);
    Ok(())
}

#[tokio::test]
async fn test_hits_plus_misses_equals_gets() -> anyhow::Result<()> {
    let cache = small_cache(3);
    cache.set("x", &1u8, None)?;
    cache.set("y", &2u8, None)?;

    let keys = ["x", "y", "z", "x", "w", "y"];
    let values: Vec<Option<u8>> = cache.mget(&keys[..]);
    assert_eq!(values, vec![Some(1), Some(2), None, Some(1), None, Some(2)]);

    let stats = cache.statistics();
    assert_eq!(stats.hits + stats.misses, keys.len() as u64);
    assert!((stats.hit_rate - 4.0 / 6.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_warm_then_dispose_twice() {
    let cache = small_cache(10);
    let outcome = cache
        .warm(|| async { vec![("one".to_string(), 1u32), ("two".to_string(), 2u32)] })
        .await;
    assert_eq!(outcome.applied, 2);
    assert!(outcome.failed.is_empty());
    assert_eq!(cache.get::<u32>("two"), Some(2));

    cache.dispose();
    cache.dispose();
    assert!(cache.is_disposed());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_command_results_scoped_by_repository() -> anyhow::Result<()> {
    let commands = CommandResultCache::new(small_cache(50), CommandCacheConfig::default());
    let args = json!({ "status": "pending", "tag": "master" });
    let reordered = json!({ "tag": "master", "status": "pending" });

    commands.set("/repo/a", "list", &args, &json!({ "tasks": [1, 2] }))?;
    commands.set("/repo/b", "list", &args, &json!({ "tasks": [3] }))?;

    assert_eq!(
        commands.get("/repo/a", "list", &reordered),
        Some(json!({ "tasks": [1, 2] }))
    );
    assert_eq!(commands.invalidate_repository("/repo/a"), 1);
    assert_eq!(commands.get("/repo/a", "list", &args), None);
    assert!(commands.get("/repo/b", "list", &args).is_some());
    Ok(())
}
