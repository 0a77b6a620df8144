#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use idle_load_agent::config::{Config, Overrides};
use idle_load_agent::validation::validate_config;
use std::path::Path;
use std::time::Duration;

#[test]
fn defaults_are_valid() {
    let c = Config::default();
    assert!(validate_config(&c).is_ok());
    assert_eq!(c.cpu_threshold, 70);
    assert_eq!(c.memory_threshold, 70);
    assert_eq!(c.sampling_period(), Duration::from_secs(2));
    assert_eq!(c.notification_cooldown(), Duration::from_secs(60));
}

#[test]
fn err_threshold_range() {
    let mut c = Config { cpu_threshold: 101, ..Config::default() };
    assert!(validate_config(&c).is_err());
    c.cpu_threshold = 100;
    c.memory_threshold = 150;
    assert!(validate_config(&c).is_err());
}

#[test]
fn err_zero_interval() {
    let c = Config { update_interval: 0, ..Config::default() };
    assert!(validate_config(&c).is_err());
}

#[test]
fn err_empty_bind_when_enabled() {
    let mut c = Config::default();
    c.status.bind = " ".into();
    assert!(validate_config(&c).is_err());
    c.status.enabled = false;
    assert!(validate_config(&c).is_ok());
}

#[test]
fn partial_yaml_keeps_defaults() {
    let c = Config::parse("cpu_threshold: 40\nnotification:\n  cooldown: 5\n").expect("parse");
    assert_eq!(c.cpu_threshold, 40);
    assert_eq!(c.memory_threshold, 70);
    assert!(c.notification.enabled);
    assert_eq!(c.notification.cooldown, 5);
    assert_eq!(Config::parse("").expect("empty"), Config::default());
}

#[test]
fn err_bad_yaml() {
    assert!(Config::parse("cpu_threshold: [1, 2").is_err());
    assert!(Config::parse("cpu_threshold: -5").is_err());
}

#[test]
fn missing_file_written_with_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("config.yaml");
    let c = Config::load(&path).expect("load");
    assert_eq!(c, Config::default());
    assert!(path.exists());
    let again = Config::load(&path).expect("reload");
    assert_eq!(again, Config::default());
}

#[test]
fn saved_file_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    let mut c = Config::default();
    c.cpu_threshold = 55;
    c.status.bind = "0.0.0.0:9000".into();
    c.save(&path).expect("save");
    assert_eq!(Config::load(&path).expect("load"), c);
}

#[test]
fn overrides_win() {
    let mut c = Config::default();
    c.apply(&Overrides {
        cpu_threshold: Some(10),
        memory_threshold: Some(20),
        update_interval: Some(5),
        status_bind: Some("127.0.0.1:1".into()),
        disable_status: true,
    });
    assert_eq!(c.cpu_threshold, 10);
    assert_eq!(c.memory_threshold, 20);
    assert_eq!(c.update_interval, 5);
    assert_eq!(c.status.bind, "127.0.0.1:1");
    assert!(!c.status.enabled);
    let t = c.thresholds().expect("thresholds");
    assert_eq!((t.cpu, t.memory), (10, 20));
}

#[test]
fn explicit_absolute_path_used_as_is() {
    let abs = std::env::temp_dir().join("agent.yaml");
    assert_eq!(Config::find_path(Some(&abs)), abs);
    let found = Config::find_path(None);
    assert_eq!(found.file_name(), Some(Path::new("config.yaml").as_os_str()));
}
