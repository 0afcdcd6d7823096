//! Host resource sampling.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// One sample of host CPU and memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Global CPU usage percentage (0-100).
    pub cpu_usage: f32,
    /// Memory usage percentage (0-100).
    pub memory_usage: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// Samples CPU and memory usage of the host.
///
/// CPU usage is measured between consecutive refreshes, so the first sample
/// after construction reads close to zero.
pub struct ResourceMonitor {
    system: Mutex<System>,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
        }
    }

    pub fn sample(&self) -> ResourceUsage {
        let mut system = self.system.lock();
        system.refresh_cpu_all();
        system.refresh_memory();

        let total = system.total_memory();
        let used = system.used_memory();
        ResourceUsage {
            cpu_usage: system.global_cpu_usage(),
            memory_usage: memory_percent(used, total),
            memory_used_bytes: used,
            memory_total_bytes: total,
        }
    }
}

fn memory_percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}
