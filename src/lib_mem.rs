#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::LoadWorker;

const MIB: u64 = 1024 * 1024;

pub const CHUNK_SIZE: u64 = 10 * MIB;
pub const PAGE_STRIDE: usize = 4096;
pub const MAX_ADJUST_DELTA: u64 = 512 * MIB;
pub const MEM_ADJUST_COOLDOWN: Duration = Duration::from_secs(2);
pub const CONVERGE_INTERVAL: Duration = Duration::from_secs(1);
/// Assumed total when the host cannot report one.
pub const FALLBACK_TOTAL_MEMORY: u64 = 16 * 1024 * MIB;
/// Share of total memory the worker may ever hold.
pub const TARGET_CEILING_RATIO: f64 = 0.8;

#[derive(Clone, Debug)]
pub struct MemorySettings {
    /// Total system memory in bytes, if known.
    pub total_memory: Option<u64>,
    pub chunk_size: u64,
    pub max_delta: u64,
    pub cooldown: Duration,
    pub tick: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            total_memory: None,
            chunk_size: CHUNK_SIZE,
            max_delta: MAX_ADJUST_DELTA,
            cooldown: MEM_ADJUST_COOLDOWN,
            tick: CONVERGE_INTERVAL,
        }
    }
}

/// Holds a resident memory footprint that converges toward a target size.
///
/// Chunks are only allocated and freed by the background convergence loop.
/// The chunk list and its byte total share one lock, which `stop` also takes
/// before clearing.
pub struct MemoryLoadWorker {
    settings: MemorySettings,
    running: AtomicBool,
    shared: Arc<Shared>,
    converger: Mutex<Option<Converger>>,
    last_adjust: Mutex<Option<Instant>>,
}

struct Shared {
    chunks: Mutex<ChunkSet>,
    target: AtomicU64,
    total_memory: AtomicU64,
}

#[derive(Default)]
struct ChunkSet {
    chunks: Vec<Vec<u8>>,
    allocated: u64,
}

struct Converger {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    // dropping the sender wakes the loop immediately
    wake: mpsc::Sender<()>,
}

impl MemoryLoadWorker {
    pub fn new(total_memory: Option<u64>) -> Self {
        Self::with_settings(MemorySettings {
            total_memory,
            ..MemorySettings::default()
        })
    }

    pub fn with_settings(settings: MemorySettings) -> Self {
        let total = settings
            .total_memory
            .filter(|t| *t > 0)
            .unwrap_or(FALLBACK_TOTAL_MEMORY);
        let settings = MemorySettings {
            chunk_size: settings.chunk_size.max(1),
            ..settings
        };
        Self {
            settings,
            running: AtomicBool::new(false),
            shared: Arc::new(Shared {
                chunks: Mutex::new(ChunkSet::default()),
                target: AtomicU64::new(0),
                total_memory: AtomicU64::new(total),
            }),
            converger: Mutex::new(None),
            last_adjust: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut slot = self.converger.lock();
        if slot.is_some() {
            return;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let (wake, sleeper) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let loop_cancel = Arc::clone(&cancel);
        let tick = self.settings.tick;
        let chunk_size = self.settings.chunk_size;
        let spawned = thread::Builder::new()
            .name("mem-converge".into())
            .spawn(move || loop {
                match sleeper.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                if loop_cancel.load(Ordering::Acquire) {
                    break;
                }
                shared.converge(chunk_size, &loop_cancel);
            });
        match spawned {
            Ok(handle) => {
                *slot = Some(Converger {
                    handle,
                    cancel,
                    wake,
                });
                self.running.store(true, Ordering::Release);
                info!(
                    total_memory = self.total_memory(),
                    "memory load started"
                );
            }
            Err(e) => warn!(error=%e, "spawn memory converger failed"),
        }
    }

    /// Ends the convergence loop, then frees every chunk and zeroes the
    /// target. The loop checks cancellation before each chunk, so the join
    /// waits for at most one chunk allocation.
    pub fn stop(&self) {
        let mut slot = self.converger.lock();
        let Some(converger) = slot.take() else {
            return;
        };
        // adjust_load re-checks `running` under this lock, so no target
        // can be written after the clear below
        let _adjust = self.last_adjust.lock();
        self.running.store(false, Ordering::Release);
        converger.cancel.store(true, Ordering::Release);
        drop(converger.wake);
        if converger.handle.join().is_err() {
            warn!("memory converger exited abnormally");
        }
        let freed = self.shared.clear();
        info!(freed_bytes = freed, "memory load stopped");
    }

    /// Drops every chunk and zeroes the target without stopping the loop.
    pub fn clear_memory(&self) {
        self.shared.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn allocated_size(&self) -> u64 {
        self.shared.chunks.lock().allocated
    }

    pub fn chunk_count(&self) -> usize {
        self.shared.chunks.lock().chunks.len()
    }

    /// Sum of the lengths of every held chunk. Equals `allocated_size`.
    pub fn held_bytes(&self) -> u64 {
        let set = self.shared.chunks.lock();
        set.chunks.iter().map(|c| c.len() as u64).sum()
    }

    pub fn target_size(&self) -> u64 {
        self.shared.target.load(Ordering::Acquire)
    }

    pub fn total_memory(&self) -> u64 {
        self.shared.total_memory.load(Ordering::Acquire)
    }

    /// Replaces the fallback total with a real reading. Zero is ignored.
    pub fn set_total_memory(&self, total: u64) {
        if total > 0 {
            self.shared.total_memory.store(total, Ordering::Release);
        }
    }

    pub fn max_target_size(&self) -> u64 {
        fraction_of(self.total_memory(), TARGET_CEILING_RATIO)
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn set_target_size(&self, bytes: u64) {
        let bounded = bytes.min(self.max_target_size());
        self.shared.target.store(bounded, Ordering::Release);
    }

    /// Moves the target toward `target_usage` percent of total memory, by at
    /// most `max_delta` bytes per call and at most once per cooldown window.
    pub fn adjust_load(&self, self_usage: f64, target_usage: f64) {
        if !self.is_running() {
            return;
        }
        let mut last = self.last_adjust.lock();
        if !self.is_running() {
            return;
        }
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.settings.cooldown {
                return;
            }
        }
        *last = Some(now);

        let requested = fraction_of(self.total_memory(), target_usage.clamp(0.0, 100.0) / 100.0);
        let current = self.target_size();
        let delta = self.settings.max_delta;
        let bounded = requested.clamp(current.saturating_sub(delta), current.saturating_add(delta));
        self.set_target_size(bounded);
        debug!(
            self_usage,
            target_usage,
            from = current,
            to = self.target_size(),
            "memory target adjusted"
        );
    }

    /// Held bytes as a percentage of total memory, clamped to 100.
    #[allow(clippy::cast_precision_loss)]
    pub fn usage(&self) -> f64 {
        if !self.is_running() {
            return 0.0;
        }
        let total = self.total_memory();
        if total == 0 {
            return 0.0;
        }
        (self.allocated_size() as f64 / total as f64 * 100.0).min(100.0)
    }
}

impl Drop for MemoryLoadWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LoadWorker for MemoryLoadWorker {
    fn start(&self) {
        MemoryLoadWorker::start(self);
    }

    fn stop(&self) {
        MemoryLoadWorker::stop(self);
    }

    fn is_running(&self) -> bool {
        MemoryLoadWorker::is_running(self)
    }

    fn usage(&self) -> f64 {
        MemoryLoadWorker::usage(self)
    }

    fn adjust_load(&self, self_usage: f64, target_usage: f64) {
        MemoryLoadWorker::adjust_load(self, self_usage, target_usage);
    }
}

impl Shared {
    fn converge(&self, chunk_size: u64, cancel: &AtomicBool) {
        let target = self.target.load(Ordering::Acquire);
        let current = self.chunks.lock().allocated;
        if current < target {
            let added = self.grow(target - current, chunk_size, cancel);
            debug!(target, added, "memory grown");
        } else if current > target {
            let freed = self.shrink(target);
            debug!(target, freed, "memory shrunk");
        }
    }

    /// Allocates `deficit` bytes as full chunks plus one remainder chunk.
    /// Chunks are built outside the lock and only pushed while not cancelled
    /// and while they still fit under the current target.
    fn grow(&self, deficit: u64, chunk_size: u64, cancel: &AtomicBool) -> u64 {
        let full = deficit / chunk_size;
        let remainder = deficit % chunk_size;
        let sizes = std::iter::repeat(chunk_size)
            .take(usize::try_from(full).unwrap_or(usize::MAX))
            .chain((remainder > 0).then_some(remainder));

        let mut added = 0u64;
        for size in sizes {
            if cancel.load(Ordering::Acquire) {
                break;
            }
            let Ok(len) = usize::try_from(size) else {
                break;
            };
            let chunk = committed_chunk(len);
            let mut set = self.chunks.lock();
            if cancel.load(Ordering::Acquire) {
                break;
            }
            // target may have dropped since the deficit was computed
            if set.allocated + size > self.target.load(Ordering::Acquire) {
                break;
            }
            set.chunks.push(chunk);
            set.allocated += size;
            added += size;
        }
        added
    }

    /// Frees from the most recently allocated end until within `target`.
    fn shrink(&self, target: u64) -> u64 {
        let mut set = self.chunks.lock();
        let mut freed = 0u64;
        while set.allocated > target {
            let Some(chunk) = set.chunks.pop() else {
                break;
            };
            let len = chunk.len() as u64;
            set.allocated -= len;
            freed += len;
        }
        freed
    }

    fn clear(&self) -> u64 {
        let mut set = self.chunks.lock();
        let freed = set.allocated;
        set.chunks.clear();
        set.allocated = 0;
        self.target.store(0, Ordering::Release);
        freed
    }
}

/// A zeroed buffer with one byte written per page so the kernel commits it.
fn committed_chunk(len: usize) -> Vec<u8> {
    let mut chunk = vec![0u8; len];
    for (page, offset) in (0..len).step_by(PAGE_STRIDE).enumerate() {
        chunk[offset] = (page % 255) as u8 + 1;
    }
    std::hint::black_box(chunk)
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn fraction_of(total: u64, ratio: f64) -> u64 {
    (total as f64 * ratio.clamp(0.0, 1.0)) as u64
}
