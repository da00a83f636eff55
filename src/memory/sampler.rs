use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// One raw memory measurement, all figures in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub heap_used: u64,
    pub heap_total: u64,
    pub external: u64,
    pub rss: u64,
}

/// Source of memory measurements
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> anyhow::Result<MemoryReading>;
}

/// Optional hook asked to reclaim memory during optimization
pub trait CollectorHook: Send + Sync {
    fn collect(&self) -> anyhow::Result<()>;
}

/// Reads the current process through `sysinfo`
///
/// Rust has no managed heap, so resident memory stands in for "heap used"
/// and virtual memory for "heap total".
pub struct ProcessSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessSampler {
    fn sample(&self) -> anyhow::Result<MemoryReading> {
        let pid = self
            .pid
            .ok_or_else(|| anyhow::anyhow!("current process id is unavailable on this platform"))?;

        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            anyhow::bail!("process {} not found", pid);
        }
        let process = system
            .process(pid)
            .ok_or_else(|| anyhow::anyhow!("process {} not found", pid))?;

        let rss = process.memory();
        Ok(MemoryReading {
            heap_used: rss,
            heap_total: process.virtual_memory().max(rss),
            external: 0,
            rss,
        })
    }
}
