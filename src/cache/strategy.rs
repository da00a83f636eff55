use std::fmt;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::manager::CacheEntry;

/// Number of hex characters kept from the argument digest
const ARGS_HASH_LEN: usize = 16;

type EntryPredicate = Box<dyn Fn(&str, &CacheEntry) -> bool + Send + Sync>;

/// Cache invalidation strategies
pub enum InvalidationStrategy {
    /// Keys matching a regular expression
    Pattern(Regex),
    /// Keys starting with a literal prefix
    Prefix(String),
    /// Arbitrary test over key and entry metadata
    Predicate(EntryPredicate),
}

impl InvalidationStrategy {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str, &CacheEntry) -> bool + Send + Sync + 'static,
    {
        InvalidationStrategy::Predicate(Box::new(f))
    }

    /// Check if a cache entry should be invalidated
    pub fn matches(&self, key: &str, entry: &CacheEntry) -> bool {
        match self {
            InvalidationStrategy::Pattern(regex) => regex.is_match(key),
            InvalidationStrategy::Prefix(prefix) => key.starts_with(prefix.as_str()),
            InvalidationStrategy::Predicate(predicate) => predicate(key, entry),
        }
    }
}

impl fmt::Debug for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationStrategy::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            InvalidationStrategy::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            InvalidationStrategy::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Cache key generation for command results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandKey {
    pub repository: String,
    pub operation: String,
    pub args_hash: String,
}

impl CommandKey {
    pub fn new(repository: &str, operation: &str, args: &Value) -> Self {
        Self {
            repository: repository.to_string(),
            operation: operation.to_string(),
            args_hash: stable_hash(args),
        }
    }

    /// Prefix shared by every key of one repository
    pub fn repository_prefix(repository: &str) -> String {
        format!("{}:", repository)
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.repository, self.operation, self.args_hash)
    }
}

/// Truncated SHA-256 of the canonical JSON form of `value`.
///
/// Object keys are sorted at every depth, so two argument maps that differ
/// only in insertion order hash identically.
pub fn stable_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex.truncate(ARGS_HASH_LEN);
    hex
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stable_hash_ignores_key_order() {
        let a = json!({"tag": "v1", "nested": {"b": 2, "a": 1}});
        let b = json!({"nested": {"a": 1, "b": 2}, "tag": "v1"});
        assert_eq!(stable_hash(&a), stable_hash(&b));
        assert_eq!(stable_hash(&a).len(), 16);
    }

    #[test]
    fn test_stable_hash_distinguishes_values() {
        assert_ne!(stable_hash(&json!({"id": 1})), stable_hash(&json!({"id": 2})));
        assert_ne!(stable_hash(&json!([1, 2])), stable_hash(&json!([2, 1])));
    }

    #[test]
    fn test_command_key_format() {
        let key = CommandKey::new("/srv/repo", "list", &json!({}));
        let rendered = key.to_string();
        assert!(rendered.starts_with("/srv/repo:list:"));
        assert!(rendered.starts_with(&CommandKey::repository_prefix("/srv/repo")));
    }

    #[test]
    fn test_prefix_and_pattern_matching() {
        let entry = crate::cache::manager::tests_support::entry();
        let prefix = InvalidationStrategy::Prefix("repo-a:".to_string());
        assert!(prefix.matches("repo-a:list:1", &entry));
        assert!(!prefix.matches("repo-ab:list:1", &entry));

        let pattern = InvalidationStrategy::Pattern(Regex::new(r":next:").unwrap());
        assert!(pattern.matches("repo-a:next:abc", &entry));
        assert!(!pattern.matches("repo-a:list:abc", &entry));
    }
}
