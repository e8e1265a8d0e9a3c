use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::Stream;

pub mod detect;
pub mod filter;
pub mod merge;
pub mod ocr;
pub mod progress;
pub mod region;
pub mod sampler;
pub mod writer;

pub struct StreamBundle<T> {
    pub stream: Pin<Box<dyn Stream<Item = T> + Send>>,
    pub total_frames: Option<u64>,
}

impl<T> StreamBundle<T> {
    pub fn new(stream: Pin<Box<dyn Stream<Item = T> + Send>>, total_frames: Option<u64>) -> Self {
        Self {
            stream,
            total_frames,
        }
    }
}

/// Counters shared by all stages of one run.
#[derive(Debug, Default)]
pub struct PipelineStats {
    sampled: AtomicU64,
    skipped: AtomicU64,
    reused: AtomicU64,
    ocr_calls: AtomicU64,
    ocr_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sampled: u64,
    pub skipped: u64,
    pub reused: u64,
    pub ocr_calls: u64,
    pub ocr_failures: u64,
}

impl PipelineStats {
    pub fn record_sampled(&self) {
        self.sampled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ocr_call(&self) {
        self.ocr_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ocr_failure(&self) {
        self.ocr_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sampled(&self) -> u64 {
        self.sampled.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sampled: self.sampled(),
            skipped: self.skipped.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            ocr_calls: self.ocr_calls.load(Ordering::Relaxed),
            ocr_failures: self.ocr_failures.load(Ordering::Relaxed),
        }
    }
}
