pub mod monitor;
pub mod object_pool;
pub mod sampler;
pub mod tracking;

pub use monitor::{
    MemoryConfig, MemoryEvent, MemoryMonitor, MemoryReport, MemorySample, MemoryStatistics, MemoryTrend,
    OptimizationReport, PressureLevel,
};
pub use object_pool::{ManagedPool, ObjectPool, ObjectPoolStats};
pub use sampler::{CollectorHook, MemoryReading, MemorySampler, ProcessSampler};
pub use tracking::{CategoryTracking, ObjectTracker, TrackingStatistics};
