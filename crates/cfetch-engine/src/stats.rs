use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Totals for one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub fetch_attempts: u64,
    pub containers_fetched: u64,
    pub bytes_fetched: u64,
    pub fetch_retries: u64,
    pub decode_retries: u64,
    pub containers_failed: u64,
    pub signatures_completed: u64,
    pub signatures_failed: u64,
    pub unauthorized: u32,
    pub duration: Duration,
}

/// Lock-free counters shared by every worker.
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    fetch_attempts: AtomicU64,
    containers_fetched: AtomicU64,
    bytes_fetched: AtomicU64,
    fetch_retries: AtomicU64,
    decode_retries: AtomicU64,
    containers_failed: AtomicU64,
    signatures_completed: AtomicU64,
    signatures_failed: AtomicU64,
    unauthorized: AtomicU32,
}

impl RunCounters {
    pub(crate) fn fetch_attempt(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetched(&self, bytes: usize) {
        self.containers_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_retry(&self) {
        self.decode_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn container_failed(&self) {
        self.containers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self, signatures: usize) {
        self.signatures_completed
            .fetch_add(signatures as u64, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self, signatures: usize) {
        self.signatures_failed
            .fetch_add(signatures as u64, Ordering::Relaxed);
    }

    /// Count one unauthorized response; returns the run total including it.
    pub(crate) fn unauthorized(&self) -> u32 {
        self.unauthorized.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn snapshot(&self, duration: Duration) -> RunStats {
        RunStats {
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            containers_fetched: self.containers_fetched.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            decode_retries: self.decode_retries.load(Ordering::Relaxed),
            containers_failed: self.containers_failed.load(Ordering::Relaxed),
            signatures_completed: self.signatures_completed.load(Ordering::Relaxed),
            signatures_failed: self.signatures_failed.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            duration,
        }
    }
}
