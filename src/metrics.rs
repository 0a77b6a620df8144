#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{Context, Result as AnyResult};
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::service::StatusReport;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub cpu_load_active: IntGauge,
    pub cpu_intensity_percent: IntGauge,
    pub cpu_self_usage_percent: Gauge,
    pub mem_load_active: IntGauge,
    pub mem_allocated_bytes: IntGauge,
    pub mem_target_bytes: IntGauge,
    pub mem_self_usage_percent: Gauge,
    pub controller_ticks_total: IntCounter,
    pub notifications_total: IntCounterVec,
    pub scrapes_total: IntCounter,
}

impl Metrics {
    pub fn new() -> AnyResult<Self> {
        let registry = Registry::new();
        let cpu_load_active = IntGauge::with_opts(Opts::new(
            "agent_cpu_load_active",
            "1 if the cpu worker is running",
        ))
        .context("create cpu_load_active")?;
        let cpu_intensity_percent = IntGauge::with_opts(Opts::new(
            "agent_cpu_intensity_percent",
            "cpu lane duty cycle",
        ))
        .context("create cpu_intensity_percent")?;
        let cpu_self_usage_percent = Gauge::with_opts(Opts::new(
            "agent_cpu_self_usage_percent",
            "estimated cpu usage of the worker",
        ))
        .context("create cpu_self_usage_percent")?;
        registry
            .register(Box::new(cpu_load_active.clone()))
            .context("register cpu_load_active")?;
        registry
            .register(Box::new(cpu_intensity_percent.clone()))
            .context("register cpu_intensity_percent")?;
        registry
            .register(Box::new(cpu_self_usage_percent.clone()))
            .context("register cpu_self_usage_percent")?;

        let mem_load_active = IntGauge::with_opts(Opts::new(
            "agent_mem_load_active",
            "1 if the memory worker is running",
        ))
        .context("create mem_load_active")?;
        let mem_allocated_bytes = IntGauge::with_opts(Opts::new(
            "agent_mem_allocated_bytes",
            "bytes held by the memory worker",
        ))
        .context("create mem_allocated_bytes")?;
        let mem_target_bytes = IntGauge::with_opts(Opts::new(
            "agent_mem_target_bytes",
            "memory worker target size",
        ))
        .context("create mem_target_bytes")?;
        let mem_self_usage_percent = Gauge::with_opts(Opts::new(
            "agent_mem_self_usage_percent",
            "memory usage of the worker",
        ))
        .context("create mem_self_usage_percent")?;
        registry
            .register(Box::new(mem_load_active.clone()))
            .context("register mem_load_active")?;
        registry
            .register(Box::new(mem_allocated_bytes.clone()))
            .context("register mem_allocated_bytes")?;
        registry
            .register(Box::new(mem_target_bytes.clone()))
            .context("register mem_target_bytes")?;
        registry
            .register(Box::new(mem_self_usage_percent.clone()))
            .context("register mem_self_usage_percent")?;

        let controller_ticks_total = IntCounter::with_opts(Opts::new(
            "agent_controller_ticks_total",
            "controller ticks completed",
        ))
        .context("create controller_ticks_total")?;
        let notifications_total = IntCounterVec::new(
            Opts::new("agent_notifications_total", "notification events"),
            &["event"],
        )
        .context("create notifications_total")?;
        let scrapes_total =
            IntCounter::with_opts(Opts::new("agent_scrapes_total", "metrics scrapes"))
                .context("create scrapes_total")?;
        registry
            .register(Box::new(controller_ticks_total.clone()))
            .context("register controller_ticks_total")?;
        registry
            .register(Box::new(notifications_total.clone()))
            .context("register notifications_total")?;
        registry
            .register(Box::new(scrapes_total.clone()))
            .context("register scrapes_total")?;
        Ok(Self {
            registry,
            cpu_load_active,
            cpu_intensity_percent,
            cpu_self_usage_percent,
            mem_load_active,
            mem_allocated_bytes,
            mem_target_bytes,
            mem_self_usage_percent,
            controller_ticks_total,
            notifications_total,
            scrapes_total,
        })
    }

    pub fn record_notification(&self, event: &str) {
        self.notifications_total.with_label_values(&[event]).inc();
    }

    /// Copies a status snapshot into the gauges.
    pub fn observe(&self, report: &StatusReport) {
        self.cpu_load_active.set(i64::from(report.cpu.running));
        self.cpu_intensity_percent
            .set(i64::from(report.cpu.intensity));
        self.cpu_self_usage_percent.set(report.cpu.usage);
        self.mem_load_active.set(i64::from(report.memory.running));
        self.mem_allocated_bytes
            .set(i64::try_from(report.memory.allocated_bytes).unwrap_or(i64::MAX));
        self.mem_target_bytes
            .set(i64::try_from(report.memory.target_bytes).unwrap_or(i64::MAX));
        self.mem_self_usage_percent.set(report.memory.usage);
        // ticks only grow, so the counter catches up by the difference
        let seen = self.controller_ticks_total.get();
        if report.controller.ticks > seen {
            self.controller_ticks_total
                .inc_by(report.controller.ticks - seen);
        }
    }

    pub fn encode_text(&self) -> AnyResult<Vec<u8>> {
        self.scrapes_total.inc();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf).context("encode metrics")?;
        Ok(buf)
    }
}
