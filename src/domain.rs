#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A worker that can produce a dialable amount of load on one resource.
///
/// `start` and `stop` are idempotent and never fail; `usage` is the worker's
/// own estimate of its contribution to the measured total, in percent.
pub trait LoadWorker: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;
    fn usage(&self) -> f64;
    fn adjust_load(&self, self_usage: f64, target_usage: f64);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    /// Upper bound for the self-usage set-point the controller may request.
    pub fn set_point_cap(self) -> f64 {
        match self {
            ResourceKind::Cpu => 100.0,
            ResourceKind::Memory => 80.0,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cpu => f.write_str("CPU"),
            ResourceKind::Memory => f.write_str("MEMORY"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> AnyResult<Self> {
        match s {
            "CPU" => Ok(Self::Cpu),
            "MEMORY" => Ok(Self::Memory),
            other => bail!(format!("unsupported resource: {other}")),
        }
    }
}

/// Per-resource controller state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
}

impl LoadState {
    pub fn from_should_run(should_run: bool) -> Self {
        if should_run {
            LoadState::Loading
        } else {
            LoadState::Idle
        }
    }

    pub fn is_loading(self) -> bool {
        self == LoadState::Loading
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlThresholds {
    pub cpu: u32,
    pub memory: u32,
}

impl ControlThresholds {
    pub fn new(cpu: u32, memory: u32) -> AnyResult<Self> {
        if cpu > 100 {
            bail!("cpu threshold must be 0..=100, got {cpu}");
        }
        if memory > 100 {
            bail!("memory threshold must be 0..=100, got {memory}");
        }
        Ok(Self { cpu, memory })
    }

    pub fn for_kind(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
        }
    }
}

/// One controller observation. Produced once per tick and never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub total_cpu: f64,
    pub total_mem: f64,
    pub cpu_self: f64,
    pub mem_self: f64,
}

impl Sample {
    pub fn external_cpu(&self) -> f64 {
        external_usage(self.total_cpu, self.cpu_self)
    }

    pub fn external_mem(&self) -> f64 {
        external_usage(self.total_mem, self.mem_self)
    }
}

/// Load attributable to other processes: `max(0, total - self)`.
pub fn external_usage(total: f64, self_usage: f64) -> f64 {
    (total - self_usage).max(0.0)
}

/// Self-usage set-point that would bring the total up to `threshold`.
pub fn target_self_usage(threshold: u32, external: f64, cap: f64) -> f64 {
    (f64::from(threshold) - external).clamp(0.0, cap)
}

/// Events emitted to the notification sink on state transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    CpuWorkStarted { threshold: u32 },
    CpuWorkStopped,
    MemWorkStarted { threshold: u32 },
    MemWorkStopped,
    SampleFailed { reason: String },
}

impl Notification {
    pub fn started(kind: ResourceKind, threshold: u32) -> Self {
        match kind {
            ResourceKind::Cpu => Notification::CpuWorkStarted { threshold },
            ResourceKind::Memory => Notification::MemWorkStarted { threshold },
        }
    }

    pub fn stopped(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Cpu => Notification::CpuWorkStopped,
            ResourceKind::Memory => Notification::MemWorkStopped,
        }
    }

    /// Resource the event belongs to; `None` for general events.
    pub fn resource(&self) -> Option<ResourceKind> {
        match self {
            Notification::CpuWorkStarted { .. } | Notification::CpuWorkStopped => {
                Some(ResourceKind::Cpu)
            }
            Notification::MemWorkStarted { .. } | Notification::MemWorkStopped => {
                Some(ResourceKind::Memory)
            }
            Notification::SampleFailed { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Notification::CpuWorkStarted { .. } => "cpu_work_started",
            Notification::CpuWorkStopped => "cpu_work_stopped",
            Notification::MemWorkStarted { .. } => "mem_work_started",
            Notification::MemWorkStopped => "mem_work_stopped",
            Notification::SampleFailed { .. } => "sample_failed",
        }
    }
}
