//! Sources of process memory readings

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

/// Reads the current memory footprint in bytes
///
/// `None` means the reading is unavailable; the monitor keeps its previous
/// state in that case.
pub trait MemorySampler: Send + Sync + 'static {
    fn sample(&self) -> Option<u64>;
}

impl<T: MemorySampler> MemorySampler for Arc<T> {
    fn sample(&self) -> Option<u64> {
        (**self).sample()
    }
}

/// Resident memory of the current process via `sysinfo`
pub struct ProcessMemorySampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for ProcessMemorySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemorySampler").field("pid", &self.pid).finish()
    }
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(reason) => {
                warn!(reason, "cannot determine current pid; memory sampling disabled");
                None
            }
        };
        Self { system: Mutex::new(System::new()), pid }
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(sysinfo::Process::memory)
    }
}

/// Sampler returning a settable value, for tests and for hosts that measure
/// memory themselves
#[derive(Debug, Clone, Default)]
pub struct FixedMemorySampler {
    bytes: Arc<AtomicU64>,
}

impl FixedMemorySampler {
    pub fn new(bytes: u64) -> Self {
        Self { bytes: Arc::new(AtomicU64::new(bytes)) }
    }

    /// Change the value returned by subsequent samples
    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemorySampler for FixedMemorySampler {
    fn sample(&self) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_sampler_reports_nonzero_usage() {
        let sampler = ProcessMemorySampler::new();
        let bytes = sampler.sample().unwrap();
        assert!(bytes > 0);
    }

    #[test]
    fn test_fixed_sampler_clones_share_value() {
        let sampler = FixedMemorySampler::new(1024);
        let handle = sampler.clone();
        assert_eq!(sampler.sample(), Some(1024));

        handle.set(4096);
        assert_eq!(sampler.sample(), Some(4096));
    }
}
