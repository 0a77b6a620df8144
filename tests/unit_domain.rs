#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use idle_load_agent::domain::{
    external_usage, target_self_usage, ControlThresholds, LoadState, Notification, ResourceKind,
    Sample,
};
use idle_load_agent::lib_cpu::tiered_step;
use std::str::FromStr;

#[test]
fn tiered_step_tiers() {
    assert_eq!(tiered_step(25.0), 10);
    assert_eq!(tiered_step(20.0), 5);
    assert_eq!(tiered_step(15.0), 5);
    assert_eq!(tiered_step(7.0), 3);
    assert_eq!(tiered_step(3.0), 2);
    assert_eq!(tiered_step(1.0), 1);
    assert_eq!(tiered_step(0.5), 0);
    assert_eq!(tiered_step(0.0), 0);
    assert_eq!(tiered_step(-0.6), -1);
    assert_eq!(tiered_step(-12.0), -5);
    assert_eq!(tiered_step(-40.0), -10);
}

#[test]
fn external_usage_never_negative() {
    assert!((external_usage(60.0, 20.0) - 40.0).abs() < f64::EPSILON);
    assert!(external_usage(10.0, 25.0).abs() < f64::EPSILON);
    let s = Sample {
        total_cpu: 50.0,
        total_mem: 40.0,
        cpu_self: 10.0,
        mem_self: 45.0,
    };
    assert!((s.external_cpu() - 40.0).abs() < f64::EPSILON);
    assert!(s.external_mem().abs() < f64::EPSILON);
}

#[test]
fn target_self_usage_clamped_to_cap() {
    assert!((target_self_usage(70, 50.0, 80.0) - 20.0).abs() < 1e-9);
    assert!(target_self_usage(70, 90.0, 100.0).abs() < f64::EPSILON);
    let mem_cap = ResourceKind::Memory.set_point_cap();
    assert!((target_self_usage(95, 5.0, mem_cap) - 80.0).abs() < f64::EPSILON);
    let cpu_cap = ResourceKind::Cpu.set_point_cap();
    assert!((target_self_usage(100, 0.0, cpu_cap) - 100.0).abs() < f64::EPSILON);
}

#[test]
fn thresholds_validated() {
    let t = ControlThresholds::new(70, 60).expect("ok");
    assert_eq!(t.for_kind(ResourceKind::Cpu), 70);
    assert_eq!(t.for_kind(ResourceKind::Memory), 60);
    assert!(ControlThresholds::new(101, 50).is_err());
    assert!(ControlThresholds::new(50, 101).is_err());
    assert!(ControlThresholds::new(0, 100).is_ok());
}

#[test]
fn resource_kind_round_trips_text() {
    assert_eq!(ResourceKind::from_str("CPU").expect("cpu"), ResourceKind::Cpu);
    assert_eq!(ResourceKind::from_str("MEMORY").expect("mem"), ResourceKind::Memory);
    assert!(ResourceKind::from_str("DISK").is_err());
    assert_eq!(ResourceKind::Memory.to_string(), "MEMORY");
}

#[test]
fn load_state_from_decision() {
    assert_eq!(LoadState::default(), LoadState::Idle);
    assert!(LoadState::from_should_run(true).is_loading());
    assert!(!LoadState::from_should_run(false).is_loading());
}

#[test]
fn notifications_by_resource() {
    assert_eq!(
        Notification::started(ResourceKind::Cpu, 70),
        Notification::CpuWorkStarted { threshold: 70 }
    );
    assert_eq!(Notification::stopped(ResourceKind::Memory), Notification::MemWorkStopped);
    assert_eq!(
        Notification::MemWorkStarted { threshold: 1 }.resource(),
        Some(ResourceKind::Memory)
    );
    let failed = Notification::SampleFailed {
        reason: "x".into(),
    };
    assert_eq!(failed.resource(), None);
    assert_eq!(failed.label(), "sample_failed");

    let v = serde_json::to_value(Notification::CpuWorkStarted { threshold: 70 }).expect("json");
    assert_eq!(v, serde_json::json!({"type": "CPU_WORK_STARTED", "threshold": 70}));
}
