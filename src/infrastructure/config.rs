use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::batch::BatchConfig;
use crate::cache::{CacheConfig, CommandCacheConfig};
use crate::infrastructure::error::{ResourceError, ResourceResult};
use crate::infrastructure::logging::LoggingConfig;
use crate::memory::MemoryConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::pool::PoolConfig;

/// Prefix of every environment override, e.g. `RESOURCE_LAYER_POOL_MAX_CONNECTIONS`.
pub const ENV_PREFIX: &str = "RESOURCE_LAYER_";

/// 资源层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceConfig {
    pub cache: CacheConfig,
    pub command_cache: CommandCacheConfig,
    pub pool: PoolConfig,
    pub batch: BatchConfig,
    pub memory: MemoryConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
}

impl ResourceConfig {
    /// Defaults, then the optional file, then `.env` and process environment,
    /// then validation.
    pub fn load(path: Option<&Path>) -> ResourceResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn from_file(path: &Path) -> ResourceResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResourceError::validation(
                format!("cannot read config file {}: {}", path.display(), e),
                None,
            )
        })?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(ResourceError::validation(
                    format!("unsupported config format: {}", path.display()),
                    None,
                ))
            }
        };
        Ok(config)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) -> ResourceResult<()> {
        env_override(&mut self.cache.max_entries, "CACHE_MAX_ENTRIES")?;
        env_override(&mut self.cache.default_ttl_ms, "CACHE_DEFAULT_TTL_MS")?;
        env_override(&mut self.cache.enable_statistics, "CACHE_ENABLE_STATISTICS")?;
        env_override(&mut self.cache.compression_threshold, "CACHE_COMPRESSION_THRESHOLD")?;
        env_override(&mut self.cache.cleanup_interval_ms, "CACHE_CLEANUP_INTERVAL_MS")?;

        env_override(&mut self.pool.min_connections, "POOL_MIN_CONNECTIONS")?;
        env_override(&mut self.pool.max_connections, "POOL_MAX_CONNECTIONS")?;
        env_override(&mut self.pool.acquire_timeout_ms, "POOL_ACQUIRE_TIMEOUT_MS")?;
        env_override(&mut self.pool.idle_timeout_ms, "POOL_IDLE_TIMEOUT_MS")?;
        env_override(&mut self.pool.health_check_interval_ms, "POOL_HEALTH_CHECK_INTERVAL_MS")?;
        env_override(&mut self.pool.max_retries, "POOL_MAX_RETRIES")?;

        env_override(&mut self.batch.max_batch_size, "BATCH_MAX_BATCH_SIZE")?;
        env_override(&mut self.batch.flush_interval_ms, "BATCH_FLUSH_INTERVAL_MS")?;
        env_override(&mut self.batch.max_wait_time_ms, "BATCH_MAX_WAIT_TIME_MS")?;
        env_override(&mut self.batch.concurrency_limit, "BATCH_CONCURRENCY_LIMIT")?;
        env_override(&mut self.batch.max_retries, "BATCH_MAX_RETRIES")?;
        env_override(&mut self.batch.retry_delay_ms, "BATCH_RETRY_DELAY_MS")?;
        env_override(&mut self.batch.memory_threshold_bytes, "BATCH_MEMORY_THRESHOLD_BYTES")?;

        env_override(&mut self.memory.max_heap_bytes, "MEMORY_MAX_HEAP_BYTES")?;
        env_override(&mut self.memory.sample_interval_ms, "MEMORY_SAMPLE_INTERVAL_MS")?;
        env_override(&mut self.memory.warning_threshold, "MEMORY_WARNING_THRESHOLD")?;
        env_override(&mut self.memory.critical_threshold, "MEMORY_CRITICAL_THRESHOLD")?;
        env_override(&mut self.memory.leak_detection_interval_ms, "MEMORY_LEAK_DETECTION_INTERVAL_MS")?;
        env_override(&mut self.memory.retention_samples, "MEMORY_RETENTION_SAMPLES")?;

        env_override(&mut self.logging.level, "LOG_LEVEL")?;

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> ResourceResult<()> {
        self.cache.validate()?;
        self.pool.validate()?;
        self.batch.validate()?;
        self.memory.validate()?;
        self.orchestrator.validate()?;
        self.logging
            .parsed_level()
            .map_err(|e| ResourceError::validation(e.to_string(), Some("logging.level")))?;
        Ok(())
    }

    /// Render as TOML, used by the `config` subcommand.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn env_override<T>(target: &mut T, key: &str) -> ResourceResult<()>
where
    T: FromStr,
    T::Err: Display,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    if let Ok(raw) = env::var(&name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| ResourceError::validation(format!("{}={}: {}", name, raw, e), Some(&name)))?;
    }
    Ok(())
}
