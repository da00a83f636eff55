pub mod command;
pub mod manager;
pub mod strategy;

pub use command::{CommandCacheConfig, CommandResultCache};
pub use manager::{
    AgeDistribution, BulkSetOutcome, CacheConfig, CacheEntry, CacheEvent, CacheManager,
    CachePerformanceMetrics, CacheStatistics, HotKey,
};
pub use strategy::{stable_hash, CommandKey, InvalidationStrategy};
