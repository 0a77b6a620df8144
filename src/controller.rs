#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{Context, Result as AnyResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{
    external_usage, target_self_usage, ControlThresholds, LoadState, LoadWorker, Notification,
    ResourceKind, Sample,
};
use crate::lib_cpu::CpuLoadWorker;
use crate::lib_mem::MemoryLoadWorker;
use crate::notify::NotificationSink;
use crate::sampler::UsageSampler;

/// Controller state shared with the status surface.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ControllerStatus {
    pub cpu_state: LoadState,
    pub mem_state: LoadState,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub last_sample: Option<Sample>,
    pub last_tick_ts_seconds: Option<i64>,
    pub last_error: Option<String>,
}

/// Closed-loop driver for both load workers.
///
/// Every tick samples total usage, subtracts each worker's own estimate, and
/// toggles the worker only when the external load crosses the threshold.
/// While a worker runs, its set-point is nudged toward `threshold - external`.
pub struct LoadController<S, N> {
    thresholds: ControlThresholds,
    period: Duration,
    cpu: Arc<CpuLoadWorker>,
    memory: Arc<MemoryLoadWorker>,
    sampler: S,
    sink: N,
    total_memory_known: bool,
    status: Arc<Mutex<ControllerStatus>>,
}

impl<S, N> LoadController<S, N>
where
    S: UsageSampler,
    N: NotificationSink,
{
    pub fn new(
        thresholds: ControlThresholds,
        period: Duration,
        cpu: Arc<CpuLoadWorker>,
        memory: Arc<MemoryLoadWorker>,
        mut sampler: S,
        sink: N,
    ) -> Self {
        let total_memory_known = refresh_total_memory(&mut sampler, &memory);
        Self {
            thresholds,
            period: period.max(Duration::from_millis(1)),
            cpu,
            memory,
            sampler,
            sink,
            total_memory_known,
            status: Arc::new(Mutex::new(ControllerStatus::default())),
        }
    }

    pub fn thresholds(&self) -> ControlThresholds {
        self.thresholds
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cpu(&self) -> &Arc<CpuLoadWorker> {
        &self.cpu
    }

    pub fn memory(&self) -> &Arc<MemoryLoadWorker> {
        &self.memory
    }

    pub fn status_handle(&self) -> Arc<Mutex<ControllerStatus>> {
        Arc::clone(&self.status)
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.lock().clone()
    }

    /// Runs one control step. Returns `None` when sampling failed and the
    /// tick was skipped; worker state is then left untouched.
    pub fn tick(&mut self) -> Option<Sample> {
        let (total_cpu, total_mem) = match self.sample_totals() {
            Ok(totals) => totals,
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(reason=%reason, "sampling failed, tick skipped");
                {
                    let mut st = self.status.lock();
                    st.skipped_ticks += 1;
                    st.last_error = Some(reason.clone());
                }
                self.sink.notify(Notification::SampleFailed { reason });
                return None;
            }
        };
        if !self.total_memory_known {
            self.total_memory_known = refresh_total_memory(&mut self.sampler, &self.memory);
        }

        let sample = Sample {
            total_cpu,
            total_mem,
            cpu_self: self.cpu.usage(),
            mem_self: self.memory.usage(),
        };
        debug!(
            total_cpu,
            total_mem,
            cpu_self = sample.cpu_self,
            mem_self = sample.mem_self,
            "usage sampled"
        );

        let (prev_cpu, prev_mem) = {
            let st = self.status.lock();
            (st.cpu_state, st.mem_state)
        };
        let cpu_state = drive(
            self.cpu.as_ref(),
            ResourceKind::Cpu,
            self.thresholds.cpu,
            sample.total_cpu,
            sample.cpu_self,
            prev_cpu,
            &self.sink,
        );
        let mem_state = drive(
            self.memory.as_ref(),
            ResourceKind::Memory,
            self.thresholds.memory,
            sample.total_mem,
            sample.mem_self,
            prev_mem,
            &self.sink,
        );

        let mut st = self.status.lock();
        st.cpu_state = cpu_state;
        st.mem_state = mem_state;
        st.ticks += 1;
        st.last_sample = Some(sample);
        st.last_tick_ts_seconds = Some(chrono::Utc::now().timestamp());
        st.last_error = None;
        Some(sample)
    }

    /// Stops both workers and returns the controller to idle.
    pub fn shutdown(&self) {
        self.cpu.stop();
        self.memory.stop();
        let mut st = self.status.lock();
        st.cpu_state = LoadState::Idle;
        st.mem_state = LoadState::Idle;
    }

    fn sample_totals(&mut self) -> AnyResult<(f64, f64)> {
        let cpu = self.sampler.sample_cpu().context("sample cpu")?;
        let mem = self.sampler.sample_memory().context("sample memory")?;
        Ok((cpu, mem))
    }
}

impl<S, N> LoadController<S, N>
where
    S: UsageSampler + 'static,
    N: NotificationSink + 'static,
{
    /// Ticks every period until `shutdown` changes, then stops both workers.
    /// Ticks run on the blocking pool, one at a time.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> AnyResult<()> {
        info!(
            period_ms = u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX),
            cpu_threshold = self.thresholds.cpu,
            memory_threshold = self.thresholds.memory,
            "controller started"
        );
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ctrl = self;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ctrl = tokio::task::spawn_blocking(move || {
                        let mut c = ctrl;
                        c.tick();
                        c
                    })
                    .await
                    .context("controller tick panicked")?;
                }
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
            }
        }
        tokio::task::spawn_blocking(move || ctrl.shutdown())
            .await
            .context("stop workers")?;
        Ok(())
    }
}

/// Edge check, then set-point adjustment, for one resource.
fn drive<N: NotificationSink>(
    worker: &dyn LoadWorker,
    kind: ResourceKind,
    threshold: u32,
    total: f64,
    self_usage: f64,
    previous: LoadState,
    sink: &N,
) -> LoadState {
    let external = external_usage(total, self_usage);
    let should_run = external < f64::from(threshold);
    let next = LoadState::from_should_run(should_run);
    if next != previous {
        if should_run {
            worker.start();
            info!(resource=%kind, external, threshold, "external usage below threshold, load started");
            sink.notify(Notification::started(kind, threshold));
        } else {
            worker.stop();
            info!(resource=%kind, external, threshold, "external usage at threshold, load stopped");
            sink.notify(Notification::stopped(kind));
        }
    }
    if should_run {
        let target = target_self_usage(threshold, external, kind.set_point_cap());
        worker.adjust_load(self_usage, target);
    }
    next
}

fn refresh_total_memory<S: UsageSampler>(sampler: &mut S, memory: &MemoryLoadWorker) -> bool {
    match sampler.total_memory() {
        Some(total) => {
            memory.set_total_memory(total);
            true
        }
        None => false,
    }
}
