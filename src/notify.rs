#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::{Notification, ResourceKind};
use crate::metrics::Metrics;

/// Receives controller events. Fire-and-forget: implementations must not
/// block the controller and own any rate limiting.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: Notification);
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn notify(&self, event: Notification) {
        (**self).notify(event);
    }
}

/// Logs events through `tracing` and counts them in the metrics registry.
///
/// Each channel (CPU, memory, general) shows at most one message per
/// cooldown window; suppressed events are still counted.
pub struct LogNotifier {
    enabled: bool,
    cooldown: Duration,
    last: Mutex<HashMap<Option<ResourceKind>, Instant>>,
    metrics: Option<Metrics>,
}

impl LogNotifier {
    pub fn new(enabled: bool, cooldown: Duration) -> Self {
        Self {
            enabled,
            cooldown,
            last: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns whether the event was shown rather than suppressed.
    pub fn deliver(&self, event: &Notification) -> bool {
        if let Some(m) = &self.metrics {
            m.record_notification(event.label());
        }
        if !self.enabled {
            return false;
        }
        let channel = event.resource();
        {
            let mut last = self.last.lock();
            let now = Instant::now();
            if let Some(prev) = last.get(&channel) {
                if now.duration_since(*prev) < self.cooldown {
                    debug!(event = event.label(), "notification suppressed by cooldown");
                    return false;
                }
            }
            last.insert(channel, now);
        }
        match event {
            Notification::CpuWorkStarted { threshold } => {
                info!(threshold, "external cpu usage below threshold, cpu load started");
            }
            Notification::CpuWorkStopped => {
                info!("external cpu usage reached threshold, cpu load stopped");
            }
            Notification::MemWorkStarted { threshold } => {
                info!(threshold, "external memory usage below threshold, memory load started");
            }
            Notification::MemWorkStopped => {
                info!("external memory usage reached threshold, memory load stopped");
            }
            Notification::SampleFailed { reason } => {
                warn!(reason=%reason, "usage sampling failed");
            }
        }
        true
    }
}

impl NotificationSink for LogNotifier {
    fn notify(&self, event: Notification) {
        self.deliver(&event);
    }
}
