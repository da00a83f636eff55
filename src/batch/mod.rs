pub mod executor;
pub mod processor;

pub use executor::BatchExecutor;
pub use processor::{
    BatchConfig, BatchEvent, BatchPerformanceMetrics, BatchProcessor, BatchStatistics, FlushOutcome,
};
