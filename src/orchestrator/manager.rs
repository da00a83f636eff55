use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::{BatchEvent, BatchPerformanceMetrics, BatchProcessor, BatchStatistics};
use crate::cache::{CacheEvent, CacheManager, CachePerformanceMetrics, CacheStatistics, CommandResultCache};
use crate::infrastructure::config::ResourceConfig;
use crate::infrastructure::error::{ResourceError, ResourceResult};
use crate::memory::{MemoryEvent, MemoryMonitor, MemorySampler, MemoryStatistics, PressureLevel, ProcessSampler};
use crate::orchestrator::command::{CommandRequest, CommandRunner, PooledCommandExecutor};
use crate::pool::{ConnectionFactory, ConnectionPool, PoolEvent, PoolStatistics};

/// Orchestrator routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Operations served through the cache and the batch queue;
    /// everything else is treated as mutating
    pub read_operations: Vec<String>,
    pub default_priority: i32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            read_operations: ["list", "show", "next", "status", "complexity-report"]
                .iter()
                .map(|op| op.to_string())
                .collect(),
            default_priority: 0,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> ResourceResult<()> {
        if let Some(blank) = self.read_operations.iter().find(|op| op.trim().is_empty()) {
            return Err(ResourceError::validation(
                format!("readOperations contains a blank entry: {:?}", blank),
                Some("orchestrator.readOperations"),
            ));
        }
        Ok(())
    }

    pub fn is_read_operation(&self, operation: &str) -> bool {
        self.read_operations.iter().any(|op| op == operation)
    }
}

/// 聚合指标
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMetrics {
    pub collected_at: DateTime<Utc>,
    pub cache: CacheStatistics,
    pub cache_performance: CachePerformanceMetrics,
    pub pool: PoolStatistics,
    pub batch: BatchStatistics,
    pub batch_performance: BatchPerformanceMetrics,
    pub memory: MemoryStatistics,
    pub memory_pressure: PressureLevel,
}

type Executor<F, R> = PooledCommandExecutor<F, R>;

/// Façade over cache, pool, batch queue and memory monitor
///
/// Read operations go cache, then batch queue, then back into the cache.
/// Mutating operations take a pooled connection directly and invalidate the
/// repository's cached results when they succeed.
pub struct ResourceOrchestrator<F, R>
where
    F: ConnectionFactory,
    R: CommandRunner<F::Connection>,
{
    config: ResourceConfig,
    cache: CacheManager,
    commands: CommandResultCache,
    pool: ConnectionPool<F>,
    batch: BatchProcessor<Executor<F, R>>,
    memory: MemoryMonitor,
    runner: Arc<R>,
    started: AtomicBool,
    stopped: AtomicBool,
    /// Last time `execute` checked memory pressure
    pressure_checked_at: Mutex<Option<Instant>>,
}

impl<F, R> ResourceOrchestrator<F, R>
where
    F: ConnectionFactory,
    R: CommandRunner<F::Connection>,
{
    /// Build every component from `config`, sampling the current process
    pub fn new(config: ResourceConfig, factory: F, runner: R) -> ResourceResult<Self> {
        Self::with_sampler(config, factory, runner, Box::new(ProcessSampler::new()))
    }

    pub fn with_sampler(
        config: ResourceConfig,
        factory: F,
        runner: R,
        sampler: Box<dyn MemorySampler>,
    ) -> ResourceResult<Self> {
        config.validate()?;

        let cache = CacheManager::new(config.cache.clone())?;
        let commands = CommandResultCache::new(cache.clone(), config.command_cache.clone());
        let pool = ConnectionPool::new(factory, config.pool.clone())?;
        let runner = Arc::new(runner);
        let executor = PooledCommandExecutor::new(
            pool.clone(),
            Arc::clone(&runner),
            config.orchestrator.read_operations.iter().cloned(),
        );
        let batch = BatchProcessor::new(executor, config.batch.clone())?;
        let memory = MemoryMonitor::new(config.memory.clone(), sampler)?;

        Ok(Self {
            config,
            cache,
            commands,
            pool,
            batch,
            memory,
            runner,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            pressure_checked_at: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn command_cache(&self) -> &CommandResultCache {
        &self.commands
    }

    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    pub fn batch(&self) -> &BatchProcessor<Executor<F, R>> {
        &self.batch
    }

    pub fn memory(&self) -> &MemoryMonitor {
        &self.memory
    }

    /// Warm the pool and start every timer. Calling it again is a no-op.
    pub async fn start(&self) -> ResourceResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ResourceError::PoolShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.pool.initialize().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.batch.start();
        self.cache.start_cleanup_task();
        self.memory.start();
        info!("resource orchestrator started");
        Ok(())
    }

    /// 执行命令
    ///
    /// 首次调用时若尚未 `start`，会先启动编排器：批处理的定时 flush 只在启动后运行。
    pub async fn execute(&self, request: CommandRequest) -> ResourceResult<Value> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ResourceError::ProcessorShuttingDown);
        }
        if !self.started.load(Ordering::SeqCst) {
            self.start().await?;
        }
        self.relieve_memory_pressure();

        if self.config.orchestrator.is_read_operation(&request.operation) {
            self.execute_read(request).await
        } else {
            self.execute_mutation(request).await
        }
    }

    async fn execute_read(&self, request: CommandRequest) -> ResourceResult<Value> {
        let args = request.args_value();
        if let Some(cached) = self.commands.get(&request.repository, &request.operation, &args) {
            debug!(repository = %request.repository, operation = %request.operation, "command cache hit");
            return Ok(cached);
        }

        let priority = request.priority.unwrap_or(self.config.orchestrator.default_priority);
        let metadata = HashMap::from([
            ("repository".to_string(), request.repository.clone()),
            ("operation".to_string(), request.operation.clone()),
        ]);
        let repository = request.repository.clone();
        let operation = request.operation.clone();

        match self.batch.add_with_metadata(request, priority, metadata).await? {
            Ok(value) => {
                if let Err(e) = self.commands.set(&repository, &operation, &args, &value) {
                    warn!(repository = %repository, operation = %operation, error = %e, "failed to cache command result");
                }
                Ok(value)
            }
            Err(message) => Err(ResourceError::command_failed(operation, message)),
        }
    }

    async fn execute_mutation(&self, request: CommandRequest) -> ResourceResult<Value> {
        let mut connection = self.pool.acquire().await?;
        let result = self.runner.run(&mut *connection, &request).await;
        self.pool.release(connection).await;

        match result {
            Ok(value) => {
                let removed = self.commands.invalidate_repository(&request.repository);
                debug!(
                    repository = %request.repository,
                    operation = %request.operation,
                    removed,
                    "mutation invalidated cached results"
                );
                Ok(value)
            }
            Err(e) => Err(ResourceError::command_failed(request.operation, e.to_string())),
        }
    }

    /// Checked at most once per `sampleIntervalMs`
    fn relieve_memory_pressure(&self) {
        let now = Instant::now();
        {
            let mut checked_at = self.pressure_checked_at.lock();
            let interval = Duration::from_millis(self.config.memory.sample_interval_ms);
            if checked_at.map_or(false, |at| now.saturating_duration_since(at) < interval) {
                return;
            }
            *checked_at = Some(now);
        }

        if self.memory.check_memory_pressure() != PressureLevel::Critical {
            return;
        }
        let expired = self.cache.cleanup();
        let report = self.memory.optimize_memory();
        warn!(
            expired,
            actions = report.actions.len(),
            "critical memory pressure, reclaimed before executing"
        );
    }

    pub fn invalidate_repository(&self, repository: &str) -> usize {
        self.commands.invalidate_repository(repository)
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        OrchestratorMetrics {
            collected_at: Utc::now(),
            cache: self.cache.statistics(),
            cache_performance: self.cache.performance_metrics(),
            pool: self.pool.statistics(),
            batch: self.batch.statistics(),
            batch_performance: self.batch.performance_metrics(),
            memory: self.memory.statistics(),
            memory_pressure: self.memory.current_pressure(),
        }
    }

    pub fn subscribe_cache(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    pub fn subscribe_pool(&self) -> broadcast::Receiver<PoolEvent> {
        self.pool.subscribe()
    }

    pub fn subscribe_batch(&self) -> broadcast::Receiver<BatchEvent> {
        self.batch.subscribe()
    }

    pub fn subscribe_memory(&self) -> broadcast::Receiver<MemoryEvent> {
        self.memory.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Drain the batch queue, then close the pool, cache and monitor.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down resource orchestrator");
        self.batch.shutdown().await;
        self.pool.shutdown().await;
        self.cache.dispose();
        self.memory.shutdown();
        info!("resource orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryReading;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingFactory;

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        type Connection = ();

        async fn create(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn validate(&self, _connection: &()) -> bool {
            true
        }

        async fn destroy(&self, _connection: ()) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRunner {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner<()> for CountingRunner {
        async fn run(&self, _connection: &mut (), request: &CommandRequest) -> anyhow::Result<Value> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if request.operation == "fail" {
                anyhow::bail!("refused");
            }
            Ok(serde_json::json!({ "run": run, "op": request.operation }))
        }
    }

    struct FixedSampler(u64);

    impl MemorySampler for FixedSampler {
        fn sample(&self) -> anyhow::Result<MemoryReading> {
            Ok(MemoryReading {
                heap_used: self.0,
                heap_total: self.0,
                external: 0,
                rss: self.0,
            })
        }
    }

    fn orchestrator(heap_used: u64) -> ResourceOrchestrator<CountingFactory, CountingRunner> {
        let mut config = ResourceConfig::default();
        config.pool.min_connections = 0;
        config.batch.max_batch_size = 1;
        config.memory.max_heap_bytes = 1000;
        ResourceOrchestrator::with_sampler(
            config,
            CountingFactory,
            CountingRunner::default(),
            Box::new(FixedSampler(heap_used)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reads_are_cached() {
        let orchestrator = orchestrator(100);
        let request = CommandRequest::new("/repo", "list").with_arg("tag", "master");

        let first = orchestrator.execute(request.clone()).await.unwrap();
        let second = orchestrator.execute(request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(orchestrator.runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.metrics().cache.hits, 1);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_repository() {
        let orchestrator = orchestrator(100);
        orchestrator.execute(CommandRequest::new("/repo", "list")).await.unwrap();
        orchestrator.execute(CommandRequest::new("/other", "list")).await.unwrap();

        orchestrator.execute(CommandRequest::new("/repo", "set-status")).await.unwrap();
        assert_eq!(orchestrator.cache().len(), 1);
        assert!(orchestrator.cache().keys()[0].starts_with("/other:"));
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_cache() {
        let orchestrator = orchestrator(100);
        orchestrator.execute(CommandRequest::new("/repo", "list")).await.unwrap();

        let err = orchestrator.execute(CommandRequest::new("/repo", "fail")).await.unwrap_err();
        assert!(matches!(err, ResourceError::CommandFailed { .. }));
        assert_eq!(orchestrator.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_critical_pressure_runs_optimization() {
        let orchestrator = orchestrator(950);
        let mut events = orchestrator.subscribe_memory();
        orchestrator.execute(CommandRequest::new("/repo", "status")).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), MemoryEvent::Critical { .. }));
        assert_eq!(orchestrator.metrics().memory_pressure, PressureLevel::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pressure_relief_is_rate_limited() {
        let orchestrator = orchestrator(950);
        let mut events = orchestrator.subscribe_memory();

        for _ in 0..5 {
            orchestrator.execute(CommandRequest::new("/repo", "status")).await.unwrap();
        }
        assert!(matches!(events.try_recv(), Ok(MemoryEvent::Critical { .. })));
        assert!(events.try_recv().is_err());

        // Next window may check again
        tokio::time::advance(Duration::from_millis(orchestrator.config().memory.sample_interval_ms)).await;
        orchestrator.execute(CommandRequest::new("/repo", "set-status")).await.unwrap();
        let mut critical = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MemoryEvent::Critical { .. }) {
                critical += 1;
            }
        }
        assert!(critical >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_before_start_completes_partial_batches() {
        let mut config = ResourceConfig::default();
        config.pool.min_connections = 0;
        let orchestrator = ResourceOrchestrator::with_sampler(
            config,
            CountingFactory,
            CountingRunner::default(),
            Box::new(FixedSampler(100)),
        )
        .unwrap();

        // One read is far below maxBatchSize, so only the flush timer dispatches it
        let result = tokio::time::timeout(
            Duration::from_secs(60),
            orchestrator.execute(CommandRequest::new("/repo", "list")),
        )
        .await;
        assert_eq!(result.unwrap().unwrap()["op"], "list");
        assert_eq!(orchestrator.batch().statistics().total_items, 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_work() {
        let orchestrator = orchestrator(100);
        orchestrator.start().await.unwrap();
        orchestrator.shutdown().await;
        orchestrator.shutdown().await;

        assert!(orchestrator.is_stopped());
        let err = orchestrator.execute(CommandRequest::new("/repo", "list")).await.unwrap_err();
        assert_eq!(err, ResourceError::ProcessorShuttingDown);
        assert!(orchestrator.pool().is_shutting_down());
        assert!(orchestrator.cache().is_disposed());
    }
}
