#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::ControlThresholds;

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const DEFAULT_STATUS_BIND: &str = "127.0.0.1:9464";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cpu_threshold: u32,
    pub memory_threshold: u32,
    /// Controller period in seconds.
    pub update_interval: u64,
    pub notification: NotificationConfig,
    pub status: StatusConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Seconds between two messages of the same kind.
    pub cooldown: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_threshold: 70,
            memory_threshold: 70,
            update_interval: 2,
            notification: NotificationConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: 60,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: DEFAULT_STATUS_BIND.to_string(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub cpu_threshold: Option<u32>,
    pub memory_threshold: Option<u32>,
    pub update_interval: Option<u64>,
    pub status_bind: Option<String>,
    pub disable_status: bool,
}

impl Config {
    /// Reads `path`, writing a commented default file first if it is missing.
    /// Keys absent from the file keep their defaults.
    pub fn load(path: &Path) -> AnyResult<Self> {
        if !path.exists() {
            let cfg = Self::default();
            cfg.save(path)
                .with_context(|| format!("create default config {}", path.display()))?;
            return Ok(cfg);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(raw: &str) -> AnyResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("invalid yaml")
    }

    pub fn save(&self, path: &Path) -> AnyResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create config dir {}", dir.display()))?;
        }
        std::fs::write(path, self.to_commented_yaml())
            .with_context(|| format!("write config {}", path.display()))
    }

    /// Resolves the config location. An explicit absolute path is used as
    /// is; an explicit relative path is taken relative to the executable.
    /// Without one, `config.yaml` next to the executable, then in the
    /// working directory.
    pub fn find_path(explicit: Option<&Path>) -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => match exe_dir {
                Some(dir) => dir.join(p),
                None => std::env::current_dir()
                    .map(|cwd| cwd.join(p))
                    .unwrap_or_else(|_| p.to_path_buf()),
            },
            None => exe_dir
                .or_else(|| std::env::current_dir().ok())
                .map_or_else(|| PathBuf::from(CONFIG_FILE_NAME), |d| d.join(CONFIG_FILE_NAME)),
        }
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(cpu) = overrides.cpu_threshold {
            self.cpu_threshold = cpu;
        }
        if let Some(mem) = overrides.memory_threshold {
            self.memory_threshold = mem;
        }
        if let Some(secs) = overrides.update_interval {
            self.update_interval = secs;
        }
        if let Some(bind) = &overrides.status_bind {
            self.status.bind.clone_from(bind);
        }
        if overrides.disable_status {
            self.status.enabled = false;
        }
    }

    pub fn thresholds(&self) -> AnyResult<ControlThresholds> {
        ControlThresholds::new(self.cpu_threshold, self.memory_threshold)
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_secs(self.update_interval.max(1))
    }

    pub fn notification_cooldown(&self) -> Duration {
        Duration::from_secs(self.notification.cooldown)
    }

    fn to_commented_yaml(&self) -> String {
        format!(
            "# idle-load-agent configuration

# CPU threshold (0-100). While other processes use less CPU than this,
# the agent adds CPU load up to the threshold.
cpu_threshold: {cpu}

# Memory threshold (0-100). While other processes use less memory than
# this, the agent holds memory up to the threshold.
memory_threshold: {mem}

# Controller period in seconds (1-10 recommended).
update_interval: {interval}

notification:
  # Emit start/stop messages.
  enabled: {notify}
  # Seconds between two messages of the same kind.
  cooldown: {cooldown}

status:
  # Serve /healthz, /status and /metrics.
  enabled: {status}
  bind: \"{bind}\"
",
            cpu = self.cpu_threshold,
            mem = self.memory_threshold,
            interval = self.update_interval,
            notify = self.notification.enabled,
            cooldown = self.notification.cooldown,
            status = self.status.enabled,
            bind = self.status.bind,
        )
    }
}
