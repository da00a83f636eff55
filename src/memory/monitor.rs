use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::infrastructure::error::{ResourceError, ResourceResult};
use crate::infrastructure::events::EventBus;
use crate::infrastructure::scheduler::PeriodicTask;
use crate::memory::object_pool::{ManagedPool, ObjectPool, ObjectPoolStats};
use crate::memory::sampler::{CollectorHook, MemoryReading, MemorySampler, ProcessSampler};
use crate::memory::tracking::{ObjectTracker, TrackingStatistics};

/// Samples considered for trend and leak detection
const TREND_WINDOW: usize = 10;
const TREND_THRESHOLD: f64 = 0.10;
const LEAK_GROWTH_RATIO: f64 = 0.70;

/// Memory monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Ceiling used to compute utilization
    pub max_heap_bytes: u64,
    pub sample_interval_ms: u64,
    /// Utilization (0..1) at which pressure becomes `Warning`
    pub warning_threshold: f64,
    /// Utilization (0..1) at which pressure becomes `Critical`
    pub critical_threshold: f64,
    pub leak_detection_interval_ms: u64,
    pub retention_samples: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_heap_bytes: 1024 * 1024 * 1024,
            sample_interval_ms: 5_000,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            leak_detection_interval_ms: 60_000,
            retention_samples: 100,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> ResourceResult<()> {
        if self.max_heap_bytes == 0 {
            return Err(ResourceError::validation(
                "maxHeapBytes must be positive",
                Some("memory.maxHeapBytes"),
            ));
        }
        if !(self.warning_threshold > 0.0 && self.warning_threshold < self.critical_threshold) {
            return Err(ResourceError::validation(
                "warningThreshold must be positive and below criticalThreshold",
                Some("memory.warningThreshold"),
            ));
        }
        if self.critical_threshold > 1.0 {
            return Err(ResourceError::validation(
                "criticalThreshold must not exceed 1.0",
                Some("memory.criticalThreshold"),
            ));
        }
        if self.sample_interval_ms == 0 || self.leak_detection_interval_ms == 0 {
            return Err(ResourceError::validation(
                "sampling intervals must be positive",
                Some("memory.sampleIntervalMs"),
            ));
        }
        if self.retention_samples < 2 {
            return Err(ResourceError::validation(
                "retentionSamples must be at least 2",
                Some("memory.retentionSamples"),
            ));
        }
        Ok(())
    }
}

/// One retained memory sample
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub instant: Instant,
    pub heap_used: u64,
    pub heap_total: u64,
    pub external: u64,
    pub rss: u64,
}

impl MemorySample {
    fn from_reading(reading: MemoryReading) -> Self {
        Self {
            timestamp: Utc::now(),
            instant: Instant::now(),
            heap_used: reading.heap_used,
            heap_total: reading.heap_total,
            external: reading.external,
            rss: reading.rss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Memory pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryEvent {
    Warning { utilization: f64 },
    Critical { utilization: f64 },
    LeakSuspected { growth_rate_bytes_per_sec: f64 },
}

/// Memory usage statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatistics {
    pub heap_used: u64,
    pub heap_total: u64,
    pub heap_utilization: f64,
    pub external: u64,
    pub rss: u64,
    pub collector_passes: u64,
    pub collector_time_ms: f64,
    pub sample_count: usize,
    pub trend: MemoryTrend,
    pub leak_suspected: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub before: MemoryStatistics,
    pub after: MemoryStatistics,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReport {
    pub generated_at: DateTime<Utc>,
    pub statistics: MemoryStatistics,
    pub pressure: PressureLevel,
    pub growth_rate_bytes_per_sec: f64,
    /// Linear extrapolation to `max_heap_bytes`; `None` unless memory is growing
    pub time_to_exhaustion_secs: Option<f64>,
    pub object_pools: Vec<ObjectPoolStats>,
    pub tracking: TrackingStatistics,
    pub recommendations: Vec<String>,
}

#[derive(Default)]
struct MonitorState {
    samples: VecDeque<MemorySample>,
    collector_passes: u64,
    collector_time: Duration,
    leak_reported: bool,
}

impl MonitorState {
    fn window(&self) -> impl Iterator<Item = &MemorySample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(TREND_WINDOW))
    }

    fn trend(&self) -> MemoryTrend {
        let window: Vec<&MemorySample> = self.window().collect();
        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return MemoryTrend::Stable;
        };
        if window.len() < 2 {
            return MemoryTrend::Stable;
        }

        let change = if first.heap_used == 0 {
            if last.heap_used > 0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            (last.heap_used as f64 - first.heap_used as f64) / first.heap_used as f64
        };

        if change > TREND_THRESHOLD {
            MemoryTrend::Increasing
        } else if change < -TREND_THRESHOLD {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        }
    }

    fn leak_suspected(&self) -> bool {
        if self.samples.len() < TREND_WINDOW {
            return false;
        }
        let window: Vec<u64> = self.window().map(|sample| sample.heap_used).collect();
        let deltas = window.len() - 1;
        let growing = window.windows(2).filter(|pair| pair[1] > pair[0]).count();
        growing as f64 / deltas as f64 >= LEAK_GROWTH_RATIO
    }

    /// Bytes per second between the first and last sample of the window
    fn growth_rate(&self) -> f64 {
        let window: Vec<&MemorySample> = self.window().collect();
        match (window.first(), window.last()) {
            (Some(first), Some(last)) if window.len() >= 2 => {
                let elapsed = last.instant.saturating_duration_since(first.instant).as_secs_f64();
                if elapsed <= 0.0 {
                    0.0
                } else {
                    (last.heap_used as f64 - first.heap_used as f64) / elapsed
                }
            }
            _ => 0.0,
        }
    }
}

struct MonitorInner {
    config: MemoryConfig,
    sampler: Box<dyn MemorySampler>,
    collector: Mutex<Option<Arc<dyn CollectorHook>>>,
    state: Mutex<MonitorState>,
    pools: Mutex<Vec<Weak<dyn ManagedPool>>>,
    tracker: Mutex<ObjectTracker>,
    events: EventBus<MemoryEvent>,
    tasks: Mutex<Vec<PeriodicTask>>,
    stopped: AtomicBool,
}

impl MonitorInner {
    fn take_sample(&self) -> Option<MemorySample> {
        match self.sampler.sample() {
            Ok(reading) => Some(self.record(reading)),
            Err(e) => {
                warn!(error = %e, "memory sampling failed");
                None
            }
        }
    }

    fn record(&self, reading: MemoryReading) -> MemorySample {
        let sample = MemorySample::from_reading(reading);
        let mut state = self.state.lock();
        state.samples.push_back(sample.clone());
        while state.samples.len() > self.config.retention_samples {
            state.samples.pop_front();
        }
        sample
    }

    fn statistics(&self) -> MemoryStatistics {
        if self.state.lock().samples.is_empty() {
            self.take_sample();
        }

        let state = self.state.lock();
        let latest = state.samples.back();
        let heap_used = latest.map_or(0, |s| s.heap_used);

        MemoryStatistics {
            heap_used,
            heap_total: latest.map_or(0, |s| s.heap_total),
            heap_utilization: heap_used as f64 / self.config.max_heap_bytes as f64,
            external: latest.map_or(0, |s| s.external),
            rss: latest.map_or(0, |s| s.rss),
            collector_passes: state.collector_passes,
            collector_time_ms: state.collector_time.as_secs_f64() * 1000.0,
            sample_count: state.samples.len(),
            trend: state.trend(),
            leak_suspected: state.leak_suspected(),
        }
    }

    fn pressure_for(&self, utilization: f64) -> PressureLevel {
        if utilization >= self.config.critical_threshold {
            PressureLevel::Critical
        } else if utilization >= self.config.warning_threshold {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    fn check_memory_pressure(&self) -> PressureLevel {
        let utilization = self.statistics().heap_utilization;
        let level = self.pressure_for(utilization);
        match level {
            PressureLevel::Critical => {
                error!(utilization, "critical memory pressure");
                self.events.emit(MemoryEvent::Critical { utilization });
            }
            PressureLevel::Warning => {
                warn!(utilization, "memory pressure warning");
                self.events.emit(MemoryEvent::Warning { utilization });
            }
            PressureLevel::Normal => {}
        }
        level
    }

    fn detect_leaks(&self) -> bool {
        let (suspected, newly, rate) = {
            let mut state = self.state.lock();
            let suspected = state.leak_suspected();
            let newly = suspected && !state.leak_reported;
            state.leak_reported = suspected;
            (suspected, newly, state.growth_rate())
        };
        if newly {
            warn!(growth_rate_bytes_per_sec = rate, "possible memory leak");
            self.events.emit(MemoryEvent::LeakSuspected {
                growth_rate_bytes_per_sec: rate,
            });
        }
        suspected
    }

    fn live_pools(&self) -> Vec<Arc<dyn ManagedPool>> {
        let mut pools = self.pools.lock();
        pools.retain(|pool| pool.strong_count() > 0);
        pools.iter().filter_map(Weak::upgrade).collect()
    }

    fn optimize_memory(&self) -> OptimizationReport {
        let before = self.statistics();
        let mut actions = Vec::new();

        for pool in self.live_pools() {
            let dropped = pool.shrink_to(pool.capacity() / 2);
            if dropped > 0 {
                actions.push(format!("shrank object pool {} by {} objects", pool.name(), dropped));
            }
        }

        let collector = self.collector.lock().clone();
        match collector {
            Some(hook) => {
                let started = Instant::now();
                let result = hook.collect();
                let elapsed = started.elapsed();
                {
                    let mut state = self.state.lock();
                    state.collector_passes += 1;
                    state.collector_time += elapsed;
                }
                match result {
                    Ok(()) => actions.push("requested collector pass".to_string()),
                    Err(e) => {
                        warn!(error = %e, "collector hook failed");
                        actions.push(format!("collector pass failed: {}", e));
                    }
                }
            }
            None => debug!("no collector hook installed, skipping collection"),
        }

        let pruned = self.tracker.lock().prune();
        if pruned > 0 {
            actions.push(format!("pruned {} released tracking records", pruned));
        }

        self.take_sample();
        let after = self.statistics();
        info!(actions = actions.len(), "memory optimization finished");
        OptimizationReport { before, after, actions }
    }

    fn generate_memory_report(&self) -> MemoryReport {
        let statistics = self.statistics();
        let pressure = self.pressure_for(statistics.heap_utilization);
        let growth_rate = self.state.lock().growth_rate();
        let time_to_exhaustion_secs = if growth_rate > 0.0 {
            let headroom = self.config.max_heap_bytes.saturating_sub(statistics.heap_used) as f64;
            Some(headroom / growth_rate)
        } else {
            None
        };
        let object_pools: Vec<ObjectPoolStats> = self.live_pools().iter().map(|pool| pool.stats()).collect();
        let tracking = self.tracker.lock().statistics();

        let mut recommendations = Vec::new();
        match pressure {
            PressureLevel::Critical => recommendations
                .push("Memory is near the configured ceiling; shed load or raise maxHeapBytes".to_string()),
            PressureLevel::Warning => {
                recommendations.push("Memory usage is elevated; consider running optimize_memory".to_string())
            }
            PressureLevel::Normal => {}
        }
        if statistics.leak_suspected {
            recommendations.push("Sustained growth across recent samples suggests a leak".to_string());
        } else if statistics.trend == MemoryTrend::Increasing {
            recommendations.push("Memory is trending upward; keep watching the growth rate".to_string());
        }
        if let Some(secs) = time_to_exhaustion_secs {
            if secs < 3600.0 {
                recommendations.push(format!("At the current rate the ceiling is reached in {:.0}s", secs));
            }
        }
        for pool in &object_pools {
            if pool.created > 0 && pool.reused == 0 {
                recommendations.push(format!("Object pool {} is never reused; consider removing it", pool.name));
            }
        }
        if recommendations.is_empty() {
            recommendations.push("Memory usage is healthy".to_string());
        }

        MemoryReport {
            generated_at: Utc::now(),
            statistics,
            pressure,
            growth_rate_bytes_per_sec: growth_rate,
            time_to_exhaustion_secs,
            object_pools,
            tracking,
            recommendations,
        }
    }
}

/// Process memory monitor
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct MemoryMonitor {
    inner: Arc<MonitorInner>,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig, sampler: Box<dyn MemorySampler>) -> ResourceResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                sampler,
                collector: Mutex::new(None),
                state: Mutex::new(MonitorState::default()),
                pools: Mutex::new(Vec::new()),
                tracker: Mutex::new(ObjectTracker::default()),
                events: EventBus::new(),
                tasks: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Monitor for the running process backed by `sysinfo`
    pub fn for_current_process(config: MemoryConfig) -> ResourceResult<Self> {
        Self::new(config, Box::new(ProcessSampler::new()))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    pub fn set_collector(&self, hook: Arc<dyn CollectorHook>) {
        *self.inner.collector.lock() = Some(hook);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.inner.events.subscribe()
    }

    /// Start the sampling and leak-detection timers. Calling it again is a no-op.
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        tasks.push(PeriodicTask::spawn(
            "memory-sampler",
            Duration::from_millis(self.inner.config.sample_interval_ms),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.take_sample();
                        inner.check_memory_pressure();
                    }
                }
            },
        ));

        let weak = Arc::downgrade(&self.inner);
        tasks.push(PeriodicTask::spawn(
            "memory-leak-detector",
            Duration::from_millis(self.inner.config.leak_detection_interval_ms),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.detect_leaks();
                        let pruned = inner.tracker.lock().prune();
                        if pruned > 0 {
                            debug!(pruned, "dropped released tracking records");
                        }
                    }
                }
            },
        ));
        info!("memory monitor started");
    }

    pub fn take_sample(&self) -> Option<MemorySample> {
        self.inner.take_sample()
    }

    /// Record an externally produced reading, e.g. from a test.
    pub fn record_sample(&self, reading: MemoryReading) -> MemorySample {
        self.inner.record(reading)
    }

    pub fn samples(&self) -> Vec<MemorySample> {
        self.inner.state.lock().samples.iter().cloned().collect()
    }

    pub fn statistics(&self) -> MemoryStatistics {
        self.inner.statistics()
    }

    pub fn check_memory_pressure(&self) -> PressureLevel {
        self.inner.check_memory_pressure()
    }

    /// Classify the latest sample without logging or emitting events
    pub fn current_pressure(&self) -> PressureLevel {
        self.inner.pressure_for(self.inner.statistics().heap_utilization)
    }

    pub fn detect_leaks(&self) -> bool {
        self.inner.detect_leaks()
    }

    pub fn optimize_memory(&self) -> OptimizationReport {
        self.inner.optimize_memory()
    }

    /// Create a pool the monitor can see and shrink; the monitor keeps only a weak reference.
    pub fn create_object_pool<T, F, R>(&self, name: &str, factory: F, reset: R, max_size: usize) -> Arc<ObjectPool<T>>
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        let pool = Arc::new(ObjectPool::new(name, max_size, factory, reset));
        let weak: Weak<dyn ManagedPool> = Arc::downgrade(&pool) as Weak<dyn ManagedPool>;
        self.inner.pools.lock().push(weak);
        debug!(pool = name, max_size, "registered object pool");
        pool
    }

    pub fn object_pool_stats(&self) -> Vec<ObjectPoolStats> {
        self.inner.live_pools().iter().map(|pool| pool.stats()).collect()
    }

    pub fn track_object<T>(&self, object: &Arc<T>, category: &str)
    where
        T: Send + Sync + 'static,
    {
        self.inner.tracker.lock().track(object, category);
    }

    pub fn tracking_statistics(&self) -> TrackingStatistics {
        self.inner.tracker.lock().statistics()
    }

    pub fn generate_memory_report(&self) -> MemoryReport {
        self.inner.generate_memory_report()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop timers and drop tracked state. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.stop();
        }
        self.inner.tracker.lock().clear();
        self.inner.pools.lock().clear();
        info!("memory monitor stopped");
    }
}
