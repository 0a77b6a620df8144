#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use idle_load_agent::controller::ControllerStatus;
use idle_load_agent::domain::{ControlThresholds, Notification};
use idle_load_agent::lib_cpu::{CpuLoadWorker, CpuSettings};
use idle_load_agent::lib_mem::{MemoryLoadWorker, MemorySettings};
use idle_load_agent::metrics::Metrics;
use idle_load_agent::notify::LogNotifier;
use idle_load_agent::service::StatusService;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn create_and_encode() {
    let m = Metrics::new().expect("metrics");
    let buf = m.encode_text().expect("encode");
    assert!(!buf.is_empty());
}

#[test]
fn snapshot_feeds_gauges() {
    let m = Metrics::new().expect("metrics");
    let cpu = Arc::new(CpuLoadWorker::with_settings(CpuSettings {
        lanes: 1,
        total_cores: 2,
        cooldown: Duration::ZERO,
        unit: Duration::from_micros(100),
    }));
    cpu.set_intensity(42);
    let memory = Arc::new(MemoryLoadWorker::with_settings(MemorySettings {
        total_memory: Some(1024 * 1024 * 1024),
        tick: Duration::from_secs(3600),
        ..MemorySettings::default()
    }));
    let controller = Arc::new(Mutex::new(ControllerStatus {
        ticks: 7,
        ..ControllerStatus::default()
    }));
    let svc = StatusService::new(
        ControlThresholds::new(70, 70).expect("thresholds"),
        cpu,
        memory,
        controller,
        m.clone(),
    );
    let text = String::from_utf8(svc.encode_metrics().expect("encode")).expect("utf8");
    assert!(text.contains("agent_cpu_intensity_percent 42"));
    assert!(text.contains("agent_controller_ticks_total 7"));
    assert!(text.contains("agent_mem_allocated_bytes 0"));
    assert_eq!(svc.health().status, "ok");
}

#[test]
fn notifier_cooldown_per_channel() {
    let m = Metrics::new().expect("metrics");
    let n = LogNotifier::new(true, Duration::from_secs(60)).with_metrics(m.clone());
    assert!(n.deliver(&Notification::CpuWorkStarted { threshold: 70 }));
    assert!(!n.deliver(&Notification::CpuWorkStopped));
    assert!(n.deliver(&Notification::MemWorkStarted { threshold: 70 }));
    assert!(n.deliver(&Notification::SampleFailed {
        reason: "boom".into()
    }));
    assert!(!n.deliver(&Notification::SampleFailed {
        reason: "boom".into()
    }));
    let stopped = m
        .notifications_total
        .with_label_values(&["cpu_work_stopped"])
        .get();
    assert_eq!(stopped, 1);
}

#[test]
fn notifier_without_cooldown_or_disabled() {
    let n = LogNotifier::new(true, Duration::ZERO);
    assert!(n.deliver(&Notification::CpuWorkStopped));
    assert!(n.deliver(&Notification::CpuWorkStopped));

    let off = LogNotifier::new(false, Duration::ZERO);
    assert!(!off.is_enabled());
    assert!(!off.deliver(&Notification::MemWorkStopped));
}

#[test]
fn controller_ticks_counter_only_moves_forward() {
    let m = Metrics::new().expect("metrics");
    let cpu = Arc::new(CpuLoadWorker::with_settings(CpuSettings {
        lanes: 1,
        total_cores: 2,
        cooldown: Duration::ZERO,
        unit: Duration::from_micros(100),
    }));
    let memory = Arc::new(MemoryLoadWorker::with_settings(MemorySettings {
        total_memory: Some(1024 * 1024 * 1024),
        tick: Duration::from_secs(3600),
        ..MemorySettings::default()
    }));
    let controller = Arc::new(Mutex::new(ControllerStatus::default()));
    let svc = StatusService::new(
        ControlThresholds::new(70, 70).expect("thresholds"),
        cpu,
        memory,
        Arc::clone(&controller),
        m.clone(),
    );

    controller.lock().ticks = 3;
    svc.encode_metrics().expect("encode");
    controller.lock().ticks = 10;
    svc.encode_metrics().expect("encode");
    assert_eq!(m.controller_ticks_total.get(), 10);
    svc.encode_metrics().expect("encode");
    assert_eq!(m.controller_ticks_total.get(), 10);

    let text = String::from_utf8(m.encode_text().expect("encode")).expect("utf8");
    assert!(text.contains("# TYPE agent_controller_ticks_total counter"));
}
