use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use resource_layer::batch::{BatchConfig, BatchExecutor, BatchProcessor, FlushOutcome};

/// Looks task ids up in one round trip per batch
#[derive(Default)]
struct TaskLookup {
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl TaskLookup {
    fn items_seen(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl BatchExecutor for TaskLookup {
    type Item = u32;
    type Output = String;

    async fn process(&self, ids: Vec<u32>) -> anyhow::Result<Vec<String>> {
        self.batches.lock().push(ids.clone());
        Ok(ids.into_iter().map(|id| format!("task-{}", id)).collect())
    }
}

fn config(max_batch_size: usize) -> BatchConfig {
    BatchConfig {
        max_batch_size,
        flush_interval_ms: 10,
        max_wait_time_ms: 20,
        concurrency_limit: 2,
        max_retries: 1,
        retry_delay_ms: 10,
        memory_threshold_bytes: 1024 * 1024,
    }
}

#[tokio::test]
async fn test_concurrent_callers_receive_their_own_results() -> anyhow::Result<()> {
    let processor = BatchProcessor::new(TaskLookup::default(), config(10))?;
    processor.start();

    let results = join_all((0..25u32).map(|id| processor.add(id, (id % 3) as i32))).await;
    for (id, result) in results.into_iter().enumerate() {
        assert_eq!(result?, format!("task-{}", id));
    }

    let batches = processor.executor().batches.lock().clone();
    assert!(batches.iter().all(|batch| batch.len() <= 10));
    assert_eq!(processor.executor().items_seen(), 25);

    let stats = processor.statistics();
    assert_eq!(stats.total_items, 25);
    assert_eq!(stats.pending_items, 0);
    processor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_manual_flush_takes_highest_priority_first() -> anyhow::Result<()> {
    // No timer: items stay queued until a size trigger or a manual flush
    let processor = BatchProcessor::new(TaskLookup::default(), config(3))?;
    let mut handles = Vec::new();

    for (expected_pending, (id, priority)) in [(1u32, 0), (2, 0)].into_iter().enumerate() {
        let worker = processor.clone();
        handles.push(tokio::spawn(async move { worker.add(id, priority).await }));
        while processor.pending_count() < expected_pending + 1 {
            tokio::task::yield_now().await;
        }
    }

    // The third item fills the batch and jumps ahead of the older ones
    let worker = processor.clone();
    handles.push(tokio::spawn(async move { worker.add(3, 5).await }));
    while processor.executor().items_seen() < 3 {
        tokio::task::yield_now().await;
    }
    assert_eq!(processor.executor().batches.lock()[0], vec![3, 1, 2]);

    let worker = processor.clone();
    handles.push(tokio::spawn(async move { worker.add(4, 9).await }));
    while processor.pending_count() < 1 {
        tokio::task::yield_now().await;
    }
    assert_eq!(processor.flush(), FlushOutcome::Dispatched(1));

    let mut outputs = Vec::new();
    for handle in handles {
        outputs.push(handle.await??);
    }
    assert_eq!(outputs, vec!["task-1", "task-2", "task-3", "task-4"]);
    assert_eq!(processor.executor().batches.lock()[1], vec![4]);
    assert_eq!(processor.flush(), FlushOutcome::Empty);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_drains_queue() -> anyhow::Result<()> {
    let processor = BatchProcessor::new(TaskLookup::default(), config(50))?;

    let waiting = {
        let processor = processor.clone();
        tokio::spawn(async move { join_all((0..5u32).map(|id| processor.add(id, 0))).await })
    };
    while processor.pending_count() < 5 {
        tokio::task::yield_now().await;
    }

    processor.shutdown().await;
    let results = waiting.await?;
    assert!(results.iter().all(|result| result.is_ok()));
    assert_eq!(processor.executor().batches.lock().len(), 1);

    let metrics = processor.performance_metrics();
    assert!((metrics.batch_fill_rate - 0.1).abs() < 1e-9);
    assert!((metrics.success_rate - 1.0).abs() < 1e-9);
    Ok(())
}
