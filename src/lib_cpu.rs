#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::LoadWorker;

pub const DEFAULT_INTENSITY: u32 = 30;
pub const CPU_ADJUST_COOLDOWN: Duration = Duration::from_millis(500);
/// One intensity point of a lane cycle. A full cycle is 100 units.
pub const DUTY_UNIT: Duration = Duration::from_micros(100);

#[derive(Clone, Debug)]
pub struct CpuSettings {
    /// Number of busy-loop lanes spawned on start.
    pub lanes: usize,
    /// Logical cores of the host, the denominator of the usage estimate.
    pub total_cores: usize,
    pub cooldown: Duration,
    pub unit: Duration,
}

impl Default for CpuSettings {
    fn default() -> Self {
        let cores = num_cpus::get().max(1);
        Self {
            lanes: cores,
            total_cores: cores,
            cooldown: CPU_ADJUST_COOLDOWN,
            unit: DUTY_UNIT,
        }
    }
}

/// Burns a dialable share of every logical core.
///
/// Each lane runs on its own OS thread and alternates between a compute burst
/// of `intensity * unit` and a sleep of `(100 - intensity) * unit`. The
/// intensity is re-read at the top of every cycle, so changes apply without
/// restarting lanes.
pub struct CpuLoadWorker {
    settings: CpuSettings,
    running: AtomicBool,
    intensity: Arc<AtomicU32>,
    live_lanes: Arc<AtomicUsize>,
    lanes: Mutex<LaneSet>,
    last_adjust: Mutex<Option<Instant>>,
}

#[derive(Default)]
struct LaneSet {
    handles: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl CpuLoadWorker {
    pub fn new() -> Self {
        Self::with_settings(CpuSettings::default())
    }

    pub fn with_settings(settings: CpuSettings) -> Self {
        let settings = CpuSettings {
            lanes: settings.lanes.max(1),
            total_cores: settings.total_cores.max(1),
            ..settings
        };
        Self {
            settings,
            running: AtomicBool::new(false),
            intensity: Arc::new(AtomicU32::new(DEFAULT_INTENSITY)),
            live_lanes: Arc::new(AtomicUsize::new(0)),
            lanes: Mutex::new(LaneSet::default()),
            last_adjust: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut set = self.lanes.lock();
        if self.running.load(Ordering::Acquire) {
            return;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        for lane in 0..self.settings.lanes {
            let intensity = Arc::clone(&self.intensity);
            let cancel_lane = Arc::clone(&cancel);
            let guard = LaneGuard::enter(Arc::clone(&self.live_lanes));
            let unit = self.settings.unit;
            let spawned = thread::Builder::new()
                .name(format!("cpu-lane-{lane}"))
                .spawn(move || {
                    let _guard = guard;
                    run_lane(&intensity, &cancel_lane, unit);
                });
            match spawned {
                Ok(handle) => set.handles.push(handle),
                Err(e) => warn!(lane, error=%e, "spawn cpu lane failed"),
            }
        }
        set.cancel = cancel;
        self.running.store(true, Ordering::Release);
        info!(
            lanes = set.handles.len(),
            intensity = self.intensity(),
            "cpu load started"
        );
    }

    /// Signals every lane and waits for them to leave their current cycle.
    /// A cycle lasts at most `100 * unit`, which bounds the wait.
    pub fn stop(&self) {
        let mut set = self.lanes.lock();
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        set.cancel.store(true, Ordering::Release);
        let mut panicked = 0usize;
        for handle in set.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            warn!(panicked, "cpu lanes exited abnormally");
        }
        info!("cpu load stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn intensity(&self) -> u32 {
        self.intensity.load(Ordering::Relaxed)
    }

    pub fn set_intensity(&self, intensity: u32) {
        self.intensity.store(intensity.min(100), Ordering::Relaxed);
    }

    pub fn reset_intensity(&self) {
        self.set_intensity(DEFAULT_INTENSITY);
    }

    /// Lanes currently alive. Never exceeds the configured lane count.
    pub fn lane_count(&self) -> usize {
        self.live_lanes.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &CpuSettings {
        &self.settings
    }

    /// Moves the intensity one tiered step toward `target_usage`.
    /// At most one step per cooldown window; ignored while stopped.
    pub fn adjust_load(&self, self_usage: f64, target_usage: f64) {
        if !self.is_running() {
            return;
        }
        let mut last = self.last_adjust.lock();
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.settings.cooldown {
                return;
            }
        }
        *last = Some(now);

        let step = tiered_step(target_usage - self_usage);
        let current = self.intensity();
        let next = current.saturating_add_signed(step).min(100);
        self.intensity.store(next, Ordering::Relaxed);
        if next != current {
            debug!(
                self_usage,
                target_usage,
                from = current,
                to = next,
                "cpu intensity adjusted"
            );
        }
    }

    /// Open-loop estimate of this worker's share of total CPU, in percent.
    pub fn usage(&self) -> f64 {
        if !self.is_running() {
            return 0.0;
        }
        estimated_usage(
            self.intensity(),
            self.settings.lanes,
            self.settings.total_cores,
        )
    }
}

impl Default for CpuLoadWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpuLoadWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LoadWorker for CpuLoadWorker {
    fn start(&self) {
        CpuLoadWorker::start(self);
    }

    fn stop(&self) {
        CpuLoadWorker::stop(self);
    }

    fn is_running(&self) -> bool {
        CpuLoadWorker::is_running(self)
    }

    fn usage(&self) -> f64 {
        CpuLoadWorker::usage(self)
    }

    fn adjust_load(&self, self_usage: f64, target_usage: f64) {
        CpuLoadWorker::adjust_load(self, self_usage, target_usage);
    }
}

/// `(intensity / 100) * (lanes / cores) * 100`, clamped to 100.
#[allow(clippy::cast_precision_loss)]
pub fn estimated_usage(intensity: u32, lanes: usize, total_cores: usize) -> f64 {
    if total_cores == 0 {
        return 0.0;
    }
    let usage = f64::from(intensity.min(100)) / 100.0 * (lanes as f64) * 100.0
        / (total_cores as f64);
    usage.min(100.0)
}

/// Intensity correction for a usage error. Large gaps close fast, small ones
/// move by a single point, and anything within half a point is left alone.
pub fn tiered_step(error: f64) -> i32 {
    let magnitude = match error.abs() {
        e if e > 20.0 => 10,
        e if e > 10.0 => 5,
        e if e > 5.0 => 3,
        e if e > 2.0 => 2,
        e if e > 0.5 => 1,
        _ => 0,
    };
    if error < 0.0 {
        -magnitude
    } else {
        magnitude
    }
}

struct LaneGuard(Arc<AtomicUsize>);

impl LaneGuard {
    fn enter(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self(live)
    }
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn run_lane(intensity: &AtomicU32, cancel: &AtomicBool, unit: Duration) {
    while !cancel.load(Ordering::Acquire) {
        let level = intensity.load(Ordering::Relaxed).min(100);
        let work = unit * level;
        let rest = unit * (100 - level);

        let burst = Instant::now();
        while burst.elapsed() < work {
            std::hint::black_box(burn());
        }
        if !rest.is_zero() {
            thread::sleep(rest);
        }
    }
}

/// A fixed bundle of floating-point work. The result only exists so the
/// optimizer cannot drop the loop bodies.
pub fn burn() -> f64 {
    // Leibniz series for pi
    let mut pi = 0.0;
    for i in 0..1000u32 {
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        pi += sign / (2.0 * f64::from(i) + 1.0);
    }
    let mut acc = pi * 4.0;

    for i in 0..100u32 {
        let angle = f64::from(i) * 0.1;
        acc += angle.sin() * angle.cos() * angle.tan();
    }

    let mut matrix = [[0.0f64; 10]; 10];
    for (i, row) in (0u32..).zip(matrix.iter_mut()) {
        for (j, cell) in (0u32..).zip(row.iter_mut()) {
            *cell = f64::from(i * j) * f64::from(i + j).sin();
        }
    }
    for i in 0..10 {
        for j in 0..10 {
            let mut dot = 0.0;
            for k in 0..10 {
                dot += matrix[i][k] * matrix[k][j];
            }
            acc += dot * 1e-6;
        }
    }

    for i in 1..100u32 {
        let x = f64::from(i);
        acc += x.ln() * f64::from(i % 10).exp();
        acc += x.sqrt() * x.powf(1.5);
    }
    std::hint::black_box(acc)
}
