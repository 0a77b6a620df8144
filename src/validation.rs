#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use crate::config::Config;

pub fn validate_config(cfg: &Config) -> AnyResult<()> {
    if cfg.cpu_threshold > 100 { bail!("cpu_threshold must be 0..=100, got {}", cfg.cpu_threshold); }
    if cfg.memory_threshold > 100 { bail!("memory_threshold must be 0..=100, got {}", cfg.memory_threshold); }
    if cfg.update_interval == 0 { bail!("update_interval must be >= 1"); }
    if cfg.status.enabled && cfg.status.bind.trim().is_empty() { bail!("status.bind is empty"); }
    Ok(())
}
