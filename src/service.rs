#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::Result as AnyResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::controller::ControllerStatus;
use crate::domain::ControlThresholds;
use crate::lib_cpu::CpuLoadWorker;
use crate::lib_mem::MemoryLoadWorker;
use crate::metrics::Metrics;

#[derive(Clone, Debug, Serialize)]
pub struct CpuStatus {
    pub running: bool,
    pub intensity: u32,
    pub lanes: usize,
    pub usage: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct MemoryStatus {
    pub running: bool,
    pub allocated_bytes: u64,
    pub target_bytes: u64,
    pub total_bytes: u64,
    pub chunks: usize,
    pub usage: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub thresholds: ControlThresholds,
    pub cpu: CpuStatus,
    pub memory: MemoryStatus,
    pub controller: ControllerStatus,
    pub generated_ts_seconds: i64,
}

/// Read-only view over the workers and controller for the status surface.
#[derive(Clone)]
pub struct StatusService {
    thresholds: ControlThresholds,
    cpu: Arc<CpuLoadWorker>,
    memory: Arc<MemoryLoadWorker>,
    controller: Arc<Mutex<ControllerStatus>>,
    metrics: Metrics,
}

impl StatusService {
    pub fn new(
        thresholds: ControlThresholds,
        cpu: Arc<CpuLoadWorker>,
        memory: Arc<MemoryLoadWorker>,
        controller: Arc<Mutex<ControllerStatus>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            thresholds,
            cpu,
            memory,
            controller,
            metrics,
        }
    }

    pub fn snapshot(&self) -> StatusReport {
        StatusReport {
            thresholds: self.thresholds,
            cpu: CpuStatus {
                running: self.cpu.is_running(),
                intensity: self.cpu.intensity(),
                lanes: self.cpu.lane_count(),
                usage: self.cpu.usage(),
            },
            memory: MemoryStatus {
                running: self.memory.is_running(),
                allocated_bytes: self.memory.allocated_size(),
                target_bytes: self.memory.target_size(),
                total_bytes: self.memory.total_memory(),
                chunks: self.memory.chunk_count(),
                usage: self.memory.usage(),
            },
            controller: self.controller.lock().clone(),
            generated_ts_seconds: chrono::Utc::now().timestamp(),
        }
    }

    pub fn encode_metrics(&self) -> AnyResult<Vec<u8>> {
        self.metrics.observe(&self.snapshot());
        self.metrics.encode_text()
    }

    pub fn health(&self) -> HealthReport {
        let report = self.snapshot();
        let intensity_ok = report.cpu.intensity <= 100;
        let lanes_ok = report.cpu.lanes <= self.cpu.settings().lanes;
        let target_ok = report.memory.target_bytes <= self.memory.max_target_size();
        let stopped_clean = report.memory.running
            || (report.memory.allocated_bytes == 0 && report.memory.target_bytes == 0);
        let invariants_ok = intensity_ok && lanes_ok && target_ok && stopped_clean;
        let metrics_ok = self.metrics.encode_text().is_ok();
        let registry_metrics = self.metrics.registry.gather().len();
        let status = if metrics_ok && invariants_ok {
            "ok"
        } else {
            "degraded"
        };
        HealthReport {
            status: status.to_string(),
            cpu_running: report.cpu.running,
            memory_running: report.memory.running,
            metrics_ok,
            registry_metrics,
            invariants_ok,
            last_error: report.controller.last_error,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub cpu_running: bool,
    pub memory_running: bool,
    pub metrics_ok: bool,
    pub registry_metrics: usize,
    pub invariants_ok: bool,
    pub last_error: Option<String>,
}
