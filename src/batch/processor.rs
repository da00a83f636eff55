use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::executor::BatchExecutor;
use crate::infrastructure::error::{ResourceError, ResourceResult};
use crate::infrastructure::events::EventBus;
use crate::infrastructure::scheduler::PeriodicTask;

/// 批处理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    /// 批处理大小上限
    pub max_batch_size: usize,
    /// 定时检查间隔（毫秒）
    pub flush_interval_ms: u64,
    /// 最长等待时间（毫秒）
    pub max_wait_time_ms: u64,
    /// 同时执行的批次上限
    pub concurrency_limit: usize,
    /// 任务重试次数
    pub max_retries: u32,
    /// 重试延迟（毫秒）
    pub retry_delay_ms: u64,
    /// 待处理项目的内存估算上限（字节）
    pub memory_threshold_bytes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            flush_interval_ms: 50,
            max_wait_time_ms: 200,
            concurrency_limit: num_cpus::get().clamp(2, 8),
            max_retries: 3,
            retry_delay_ms: 100,
            memory_threshold_bytes: 50 * 1024 * 1024,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> ResourceResult<()> {
        if self.max_batch_size == 0 {
            return Err(ResourceError::validation(
                "maxBatchSize must be at least 1",
                Some("batch.maxBatchSize"),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(ResourceError::validation(
                "concurrencyLimit must be at least 1",
                Some("batch.concurrencyLimit"),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(ResourceError::validation(
                "flushIntervalMs must be positive",
                Some("batch.flushIntervalMs"),
            ));
        }
        Ok(())
    }

    fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }
}

/// 批处理生命周期事件
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started { batch_id: Uuid, size: usize },
    Succeeded { batch_id: Uuid, size: usize, duration_ms: u64 },
    Failed { batch_id: Uuid, size: usize, error: String },
    Retry { item_id: Uuid, attempt: u32 },
    Rejected { item_id: Uuid, reason: String },
}

/// flush 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 提交了一个包含 n 个项目的批次
    Dispatched(usize),
    /// 并发批次已满，等待下一次触发
    Deferred,
    Empty,
}

/// 批处理统计信息
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatistics {
    pub total_batches: u64,
    pub total_items: u64,
    pub successful_batches: u64,
    pub failed_batches: u64,
    pub retried_items: u64,
    pub rejected_items: u64,
    pub solo_dispatches: u64,
    pub average_batch_size: f64,
    pub average_processing_time_ms: f64,
    pub estimated_queue_wait_ms: f64,
    pub pending_items: usize,
    pub pending_memory_bytes: usize,
    pub in_flight_batches: usize,
    pub scheduled_retries: usize,
    pub shutting_down: bool,
}

/// 性能指标
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPerformanceMetrics {
    pub batch_fill_rate: f64,
    pub concurrency_utilization: f64,
    pub success_rate: f64,
    pub throughput_per_second: f64,
    pub average_processing_time_ms: f64,
    pub estimated_queue_wait_ms: f64,
}

type Metadata = HashMap<String, String>;

struct PendingItem<E: BatchExecutor> {
    id: Uuid,
    payload: E::Item,
    priority: i32,
    sequence: u64,
    enqueued_at: Instant,
    first_dispatched_at: Option<Instant>,
    retry_count: u32,
    memory: usize,
    metadata: Option<Metadata>,
    responder: oneshot::Sender<ResourceResult<E::Output>>,
}

#[derive(Debug, Default)]
struct BatchCounters {
    batches: u64,
    items: u64,
    successful_batches: u64,
    failed_batches: u64,
    retries: u64,
    rejected: u64,
    solo: u64,
    processing_time: Duration,
    queue_wait: Duration,
    queue_wait_samples: u64,
}

/// Priority desc, then arrival order
type QueueKey = (Reverse<i32>, u64);

struct BatchState<E: BatchExecutor> {
    pending: BTreeMap<QueueKey, PendingItem<E>>,
    pending_memory: usize,
    in_flight: usize,
    scheduled_retries: usize,
    next_sequence: u64,
    shutting_down: bool,
    counters: BatchCounters,
}

impl<E: BatchExecutor> BatchState<E> {
    fn push(&mut self, item: PendingItem<E>) {
        self.pending_memory += item.memory;
        self.pending.insert((Reverse(item.priority), item.sequence), item);
    }

    fn oldest_wait(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .map(|item| now.saturating_duration_since(item.enqueued_at))
            .max()
    }

    fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.scheduled_retries == 0
    }
}

struct ProcessorInner<E: BatchExecutor> {
    executor: E,
    config: BatchConfig,
    state: Mutex<BatchState<E>>,
    events: EventBus<BatchEvent>,
    /// Signalled whenever an in-flight batch or a scheduled retry finishes
    settled: Notify,
    flush_task: Mutex<Option<PeriodicTask>>,
    started_at: Instant,
}

impl<E: BatchExecutor> ProcessorInner<E> {
    async fn add(
        self: &Arc<Self>,
        payload: E::Item,
        priority: i32,
        metadata: Option<Metadata>,
    ) -> ResourceResult<E::Output> {
        if !self.executor.can_batch(&payload) {
            return self.execute_solo(payload).await;
        }

        let memory = self.executor.estimate_memory_usage(&payload);
        let (responder, receiver) = oneshot::channel();

        let should_flush = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return Err(ResourceError::ProcessorShuttingDown);
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.push(PendingItem {
                id: Uuid::new_v4(),
                payload,
                priority,
                sequence,
                enqueued_at: Instant::now(),
                first_dispatched_at: None,
                retry_count: 0,
                memory,
                metadata,
                responder,
            });
            state.pending.len() >= self.config.max_batch_size
                || state.pending_memory > self.config.memory_threshold_bytes
        };

        if should_flush {
            self.flush();
        }

        receiver.await.unwrap_or(Err(ResourceError::ProcessorShuttingDown))
    }

    /// 单独执行，不经过队列、并发限制和重试
    async fn execute_solo(&self, payload: E::Item) -> ResourceResult<E::Output> {
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return Err(ResourceError::ProcessorShuttingDown);
            }
            state.counters.solo += 1;
        }

        debug!("dispatching non-batchable item on its own");
        match self.executor.process(vec![payload]).await {
            Ok(mut outputs) if outputs.len() == 1 => outputs
                .pop()
                .ok_or_else(|| ResourceError::batch_failed(1, "executor returned no result")),
            Ok(outputs) => Err(ResourceError::batch_failed(
                1,
                format!("executor returned {} results for 1 item", outputs.len()),
            )),
            Err(e) => Err(ResourceError::batch_failed(1, e.to_string())),
        }
    }

    fn flush(self: &Arc<Self>) -> FlushOutcome {
        let batch: Vec<PendingItem<E>> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.pending.is_empty() {
                return FlushOutcome::Empty;
            }
            if state.in_flight >= self.config.concurrency_limit {
                debug!(
                    in_flight = state.in_flight,
                    pending = state.pending.len(),
                    "flush deferred, concurrency limit reached"
                );
                return FlushOutcome::Deferred;
            }

            let mut batch = Vec::with_capacity(self.config.max_batch_size.min(state.pending.len()));
            while batch.len() < self.config.max_batch_size {
                match state.pending.pop_first() {
                    Some((_, item)) => batch.push(item),
                    None => break,
                }
            }
            state.pending_memory = state.pending.values().map(|item| item.memory).sum();
            state.in_flight += 1;
            batch
        };

        let size = batch.len();
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.execute_batch(batch).await });
        FlushOutcome::Dispatched(size)
    }

    fn flush_due(&self) -> bool {
        let state = self.state.lock();
        if state.pending.is_empty() {
            return false;
        }
        state.shutting_down
            || state.pending.len() >= self.config.max_batch_size
            || state.pending_memory > self.config.memory_threshold_bytes
            || state
                .oldest_wait(Instant::now())
                .map_or(false, |waited| waited >= self.config.max_wait())
    }

    async fn execute_batch(self: Arc<Self>, mut items: Vec<PendingItem<E>>) {
        let batch_id = Uuid::new_v4();
        let size = items.len();
        let dispatched_at = Instant::now();

        {
            let mut state = self.state.lock();
            state.counters.batches += 1;
            state.counters.items += size as u64;
            for item in items.iter_mut() {
                if item.first_dispatched_at.is_none() {
                    item.first_dispatched_at = Some(dispatched_at);
                    state.counters.queue_wait += dispatched_at.saturating_duration_since(item.enqueued_at);
                    state.counters.queue_wait_samples += 1;
                }
            }
        }
        self.events.emit(BatchEvent::Started { batch_id, size });
        debug!(%batch_id, size, "executing batch");

        let payloads: Vec<E::Item> = items.iter().map(|item| item.payload.clone()).collect();
        let result = self.executor.process(payloads).await;
        let elapsed = dispatched_at.elapsed();

        let failure = match result {
            Ok(outputs) if outputs.len() == size => {
                {
                    let mut state = self.state.lock();
                    state.counters.successful_batches += 1;
                    state.counters.processing_time += elapsed;
                }
                for (item, output) in items.into_iter().zip(outputs) {
                    let _ = item.responder.send(Ok(output));
                }
                self.events.emit(BatchEvent::Succeeded {
                    batch_id,
                    size,
                    duration_ms: elapsed.as_millis() as u64,
                });
                None
            }
            Ok(outputs) => Some((
                items,
                format!("executor returned {} results for {} items", outputs.len(), size),
            )),
            Err(e) => Some((items, e.to_string())),
        };

        if let Some((items, message)) = failure {
            {
                let mut state = self.state.lock();
                state.counters.failed_batches += 1;
                state.counters.processing_time += elapsed;
            }
            warn!(%batch_id, size, error = %message, "batch failed");
            self.events.emit(BatchEvent::Failed {
                batch_id,
                size,
                error: message.clone(),
            });
            self.handle_failure(items, size, message);
        }

        self.state.lock().in_flight -= 1;
        self.settled.notify_waiters();

        if self.flush_due() {
            self.flush();
        }
    }

    fn handle_failure(self: &Arc<Self>, items: Vec<PendingItem<E>>, batch_size: usize, message: String) {
        let now = Instant::now();
        let max_wait = self.config.max_wait();

        let (shutting_down, mut retry, reject) = {
            let state = self.state.lock();
            let shutting_down = state.shutting_down;
            let (retry, reject): (Vec<_>, Vec<_>) = items.into_iter().partition(|item| {
                let in_window = item
                    .first_dispatched_at
                    .map_or(true, |first| now.saturating_duration_since(first) < max_wait);
                !shutting_down && item.retry_count < self.config.max_retries && in_window
            });
            (shutting_down, retry, reject)
        };

        for item in reject {
            let error = if shutting_down {
                ResourceError::ProcessorShuttingDown
            } else if item.retry_count == 0 {
                ResourceError::batch_failed(batch_size, message.clone())
            } else {
                ResourceError::RetriesExhausted {
                    item_id: item.id.to_string(),
                    attempts: item.retry_count,
                    last_error: message.clone(),
                }
            };
            warn!(
                item_id = %item.id,
                retries = item.retry_count,
                metadata = ?item.metadata,
                "batch item rejected"
            );
            self.events.emit(BatchEvent::Rejected {
                item_id: item.id,
                reason: error.to_string(),
            });
            self.state.lock().counters.rejected += 1;
            let _ = item.responder.send(Err(error));
        }

        if retry.is_empty() {
            return;
        }

        for item in retry.iter_mut() {
            item.retry_count += 1;
            self.events.emit(BatchEvent::Retry {
                item_id: item.id,
                attempt: item.retry_count,
            });
        }
        {
            let mut state = self.state.lock();
            state.counters.retries += retry.len() as u64;
            state.scheduled_retries += 1;
        }
        debug!(count = retry.len(), delay_ms = self.config.retry_delay_ms, "scheduling retry");

        let inner = Arc::clone(self);
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = inner.state.lock();
                for item in retry {
                    state.push(item);
                }
                state.scheduled_retries -= 1;
            }
            inner.settled.notify_waiters();
            inner.flush();
        });
    }

    fn statistics(&self) -> BatchStatistics {
        let state = self.state.lock();
        let counters = &state.counters;
        let finished = counters.successful_batches + counters.failed_batches;

        BatchStatistics {
            total_batches: counters.batches,
            total_items: counters.items,
            successful_batches: counters.successful_batches,
            failed_batches: counters.failed_batches,
            retried_items: counters.retries,
            rejected_items: counters.rejected,
            solo_dispatches: counters.solo,
            average_batch_size: average(counters.items as f64, counters.batches),
            average_processing_time_ms: average(counters.processing_time.as_secs_f64() * 1000.0, finished),
            estimated_queue_wait_ms: average(
                counters.queue_wait.as_secs_f64() * 1000.0,
                counters.queue_wait_samples,
            ),
            pending_items: state.pending.len(),
            pending_memory_bytes: state.pending_memory,
            in_flight_batches: state.in_flight,
            scheduled_retries: state.scheduled_retries,
            shutting_down: state.shutting_down,
        }
    }

    fn performance_metrics(&self) -> BatchPerformanceMetrics {
        let stats = self.statistics();
        let finished = stats.successful_batches + stats.failed_batches;
        let uptime = self.started_at.elapsed().as_secs_f64();

        BatchPerformanceMetrics {
            batch_fill_rate: stats.average_batch_size / self.config.max_batch_size as f64,
            concurrency_utilization: stats.in_flight_batches as f64 / self.config.concurrency_limit as f64,
            success_rate: average(stats.successful_batches as f64, finished),
            throughput_per_second: if uptime > 0.0 {
                stats.total_items as f64 / uptime
            } else {
                0.0
            },
            average_processing_time_ms: stats.average_processing_time_ms,
            estimated_queue_wait_ms: stats.estimated_queue_wait_ms,
        }
    }

    async fn shutdown(self: &Arc<Self>) {
        let first_call = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.shutting_down, true)
        };
        if first_call {
            if let Some(task) = self.flush_task.lock().take() {
                task.stop();
            }
            info!(pending = self.state.lock().pending.len(), "batch processor shutting down");
        }

        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            while let FlushOutcome::Dispatched(_) = self.flush() {}

            {
                let state = self.state.lock();
                if state.pending.is_empty() && state.is_idle() {
                    break;
                }
            }
            settled.await;
        }

        if first_call {
            info!("batch processor drained");
        }
    }
}

fn average(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// 批处理器
///
/// Items wait in a priority queue and are handed to the executor in groups
/// of at most `max_batch_size`. Cloning yields another handle to the same
/// queue.
pub struct BatchProcessor<E: BatchExecutor> {
    inner: Arc<ProcessorInner<E>>,
}

impl<E: BatchExecutor> Clone for BatchProcessor<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: BatchExecutor> BatchProcessor<E> {
    /// 创建新的批处理器
    pub fn new(executor: E, config: BatchConfig) -> ResourceResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ProcessorInner {
                executor,
                config,
                state: Mutex::new(BatchState {
                    pending: BTreeMap::new(),
                    pending_memory: 0,
                    in_flight: 0,
                    scheduled_retries: 0,
                    next_sequence: 0,
                    shutting_down: false,
                    counters: BatchCounters::default(),
                }),
                events: EventBus::new(),
                settled: Notify::new(),
                flush_task: Mutex::new(None),
                started_at: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// 启动定时 flush：每个间隔检查最早的待处理项目是否已等待超过 `max_wait_time_ms`
    pub fn start(&self) {
        let mut slot = self.inner.flush_task.lock();
        if slot.is_some() || self.inner.state.lock().shutting_down {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = Duration::from_millis(self.inner.config.flush_interval_ms);
        *slot = Some(PeriodicTask::spawn("batch-flush", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    if inner.flush_due() {
                        inner.flush();
                    }
                }
            }
        }));
    }

    /// 添加项目并等待其结果
    pub async fn add(&self, item: E::Item, priority: i32) -> ResourceResult<E::Output> {
        self.inner.add(item, priority, None).await
    }

    pub async fn add_with_metadata(
        &self,
        item: E::Item,
        priority: i32,
        metadata: HashMap<String, String>,
    ) -> ResourceResult<E::Output> {
        self.inner.add(item, priority, Some(metadata)).await
    }

    pub fn flush(&self) -> FlushOutcome {
        self.inner.flush()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn statistics(&self) -> BatchStatistics {
        self.inner.statistics()
    }

    pub fn performance_metrics(&self) -> BatchPerformanceMetrics {
        self.inner.performance_metrics()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// 停止接收新项目，执行剩余项目并等待所有批次与重试完成
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
