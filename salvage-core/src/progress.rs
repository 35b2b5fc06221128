use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const REPORT_EVERY: Duration = Duration::from_secs(5);

/// Run counters with an optional background reporter.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    chunks_done: Arc<AtomicU64>,
    chunks_total: Arc<AtomicU64>,
    sectors: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            chunks_done: Arc::new(AtomicU64::new(0)),
            chunks_total: Arc::new(AtomicU64::new(0)),
            sectors: Arc::new(AtomicU64::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_chunks_total(&self, n: u64) {
        self.chunks_total.store(n, Ordering::Relaxed);
    }
    pub fn inc_chunk(&self) {
        self.chunks_done.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_sector(&self) {
        self.sectors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn chunks_done(&self) -> u64 {
        self.chunks_done.load(Ordering::Relaxed)
    }
    pub fn sectors(&self) -> u64 {
        self.sectors.load(Ordering::Relaxed)
    }
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn start(&self) {
        if !self.enabled || self.running.swap(true, Ordering::Relaxed) {
            return;
        }
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(REPORT_EVERY);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                info!(
                    elapsed_secs = t0.elapsed().as_secs(),
                    chunks_done = this.chunks_done(),
                    chunks_total = this.chunks_total.load(Ordering::Relaxed),
                    sectors = this.sectors(),
                    bytes = this.bytes(),
                    "recovery progress"
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
