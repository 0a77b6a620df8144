#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use std::time::Duration;
use sysinfo::System;

/// Source of system-wide utilization readings, in percent.
///
/// Calls may block: a CPU reading needs two snapshots some time apart.
pub trait UsageSampler: Send {
    fn sample_cpu(&mut self) -> AnyResult<f64>;
    fn sample_memory(&mut self) -> AnyResult<f64>;

    /// Total physical memory in bytes, when the host can report it.
    fn total_memory(&mut self) -> Option<u64> {
        None
    }
}

pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Samples the host through `sysinfo`.
pub struct SystemSampler {
    system: System,
    cpu_window: Duration,
    last_cpu: f64,
    last_memory: f64,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_cpu_window(CPU_SAMPLE_WINDOW)
    }

    pub fn with_cpu_window(window: Duration) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system,
            cpu_window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
            last_cpu: 0.0,
            last_memory: 0.0,
        }
    }

    /// Last successful CPU reading.
    pub fn cached_cpu(&self) -> f64 {
        self.last_cpu
    }

    /// Last successful memory reading.
    pub fn cached_memory(&self) -> f64 {
        self.last_memory
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSampler for SystemSampler {
    /// Average utilization of all cores over the sample window.
    fn sample_cpu(&mut self) -> AnyResult<f64> {
        self.system.refresh_cpu_usage();
        std::thread::sleep(self.cpu_window);
        self.system.refresh_cpu_usage();
        if self.system.cpus().is_empty() {
            bail!("host reported no cpus");
        }
        let usage = f64::from(self.system.global_cpu_usage());
        if !usage.is_finite() {
            bail!("cpu usage reading is not a number");
        }
        self.last_cpu = usage.clamp(0.0, 100.0);
        Ok(self.last_cpu)
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_memory(&mut self) -> AnyResult<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            bail!("total memory unavailable");
        }
        let used = self.system.used_memory();
        self.last_memory = (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        Ok(self.last_memory)
    }

    fn total_memory(&mut self) -> Option<u64> {
        self.system.refresh_memory();
        Some(self.system.total_memory()).filter(|t| *t > 0)
    }
}
