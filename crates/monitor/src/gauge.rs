//! Gauge traits for resource counters.
//!
//! These traits abstract platform-specific implementations,
//! allowing for easier testing and cross-platform support.

use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// GPU utilisation in percent, or `None` when the platform has no counter.
pub trait GpuGauge: Send + Sync {
    fn gpu_usage(&self) -> Option<f64>;
}

/// Memory used by this process, in megabytes.
pub trait RamGauge: Send + Sync {
    fn ram_usage_mb(&self) -> f64;
}

/// Null implementation for platforms without a GPU counter.
pub struct NullGpuGauge;

impl GpuGauge for NullGpuGauge {
    fn gpu_usage(&self) -> Option<f64> {
        None
    }
}

/// Resident memory of the current process, read through `sysinfo`.
pub struct ProcessRamGauge {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessRamGauge {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!(error = e, "cannot resolve current pid"))
            .ok();
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for ProcessRamGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl RamGauge for ProcessRamGauge {
    fn ram_usage_mb(&self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        let mut sys = self
            .system
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        sys.process(pid)
            .map(|process| process.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}
