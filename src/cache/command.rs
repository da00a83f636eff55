use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::manager::CacheManager;
use crate::cache::strategy::{CommandKey, InvalidationStrategy};
use crate::infrastructure::error::{ResourceError, ResourceResult};

/// Per-operation TTL table for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandCacheConfig {
    /// Operation name to TTL in milliseconds; unknown operations use the cache default
    pub operation_ttl_ms: HashMap<String, u64>,
}

impl Default for CommandCacheConfig {
    fn default() -> Self {
        let operation_ttl_ms = [
            ("next", 10_000),
            ("list", 30_000),
            ("show", 60_000),
            ("status", 15_000),
            ("complexity-report", 60 * 60 * 1000),
        ]
        .into_iter()
        .map(|(op, ttl)| (op.to_string(), ttl))
        .collect();

        Self { operation_ttl_ms }
    }
}

impl CommandCacheConfig {
    pub fn ttl_for(&self, operation: &str) -> Option<Duration> {
        self.operation_ttl_ms
            .get(operation)
            .filter(|ms| **ms > 0)
            .map(|ms| Duration::from_millis(*ms))
    }
}

/// Cache of command results keyed by `repository:operation:hash(args)`
#[derive(Clone)]
pub struct CommandResultCache {
    cache: CacheManager,
    config: CommandCacheConfig,
}

impl CommandResultCache {
    pub fn new(cache: CacheManager, config: CommandCacheConfig) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn key(repository: &str, operation: &str, args: &Value) -> String {
        CommandKey::new(repository, operation, args).to_string()
    }

    pub fn ttl_for(&self, operation: &str) -> Option<Duration> {
        self.config.ttl_for(operation)
    }

    pub fn get(&self, repository: &str, operation: &str, args: &Value) -> Option<Value> {
        let key = Self::key(repository, operation, args);
        // Stored as JSON text; bincode cannot drive a self-describing `Value`
        let text: String = self.cache.get(&key)?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(_) => {
                self.cache.delete(&key);
                None
            }
        }
    }

    pub fn set(&self, repository: &str, operation: &str, args: &Value, result: &Value) -> ResourceResult<()> {
        let key = Self::key(repository, operation, args);
        let text = serde_json::to_string(result).map_err(|e| ResourceError::CacheCodec {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.cache.set(&key, &text, self.ttl_for(operation))
    }

    /// Remove every cached result belonging to `repository`.
    pub fn invalidate_repository(&self, repository: &str) -> usize {
        let removed = self
            .cache
            .invalidate(&InvalidationStrategy::Prefix(CommandKey::repository_prefix(repository)));
        debug!(repository, removed, "invalidated repository results");
        removed
    }
}
