#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod controller;
pub mod domain;
pub mod http;
pub mod lib_cpu;
pub mod lib_mem;
pub mod metrics;
pub mod notify;
pub mod sampler;
pub mod service;
pub mod validation;

pub use config::{Config, Overrides};
pub use controller::{ControllerStatus, LoadController};
pub use domain::{ControlThresholds, LoadState, LoadWorker, Notification, ResourceKind, Sample};
pub use http::{healthz, scrape_metrics, serve, status, AppState};
pub use lib_cpu::{CpuLoadWorker, CpuSettings};
pub use lib_mem::{MemoryLoadWorker, MemorySettings};
pub use metrics::Metrics;
pub use notify::{LogNotifier, NotificationSink};
pub use sampler::{SystemSampler, UsageSampler};
pub use service::{HealthReport, StatusReport, StatusService};
pub use validation::validate_config;
