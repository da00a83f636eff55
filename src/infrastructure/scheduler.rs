use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Handle to a background task that runs a job on a fixed period.
///
/// The task runs on tokio's clock, so a paused test runtime drives it with
/// `tokio::time::advance`. The first run happens one full period after
/// spawning. [`stop`](Self::stop) aborts immediately, including a job in
/// progress; [`shutdown`](Self::shutdown) lets the current job finish first.
/// Both are idempotent, and dropping the handle stops the task.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_signal: Arc<Notify>,
}

impl PeriodicTask {
    /// Spawn `job` every `period`. Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let stop_signal = Arc::new(Notify::new());
        let stopped = Arc::clone(&stop_signal);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // The signal is only observed between jobs
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stopped.notified() => break,
                }
                job().await;
            }
        });
        debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");

        Self {
            name,
            handle: Mutex::new(Some(handle)),
            stop_signal,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            debug!(task = self.name, "periodic task stopped");
        }
    }

    /// Stop after the job in progress, if any, has run to completion.
    ///
    /// Must not be awaited from inside the job itself.
    pub async fn shutdown(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.stop_signal.notify_one();
            if let Err(e) = handle.await {
                debug!(task = self.name, error = %e, "periodic task ended abnormally");
            }
            debug!(task = self.name, "periodic task shut down");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_period() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(100), move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        task.stop();
        task.stop();
        assert!(!task.is_running());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_running_job_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_clone = finished.clone();
        let task = PeriodicTask::spawn("slow", Duration::from_millis(100), move || {
            let finished = finished_clone.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        });

        // First job starts at 100ms and is still sleeping
        tokio::time::sleep(Duration::from_millis(150)).await;
        task.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!task.is_running());

        task.shutdown().await;
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
