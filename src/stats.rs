/*!
 * Lightweight process-wide counters for transfer operations.
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ErrorCategory, TransferError};

#[derive(Debug, Clone)]
pub struct TransferStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug)]
struct StatsInner {
    successful_operations: AtomicU64,
    failed_operations: AtomicU64,
    total_retries: AtomicU64,
    transport_errors: AtomicU64,
    corrupted_errors: AtomicU64,
    capacity_errors: AtomicU64,
    bytes_moved: AtomicU64,
    start_time: Instant,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                successful_operations: AtomicU64::new(0),
                failed_operations: AtomicU64::new(0),
                total_retries: AtomicU64::new(0),
                transport_errors: AtomicU64::new(0),
                corrupted_errors: AtomicU64::new(0),
                capacity_errors: AtomicU64::new(0),
                bytes_moved: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_success(&self, bytes: u64) {
        self.inner
            .successful_operations
            .fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_moved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &TransferError) {
        self.inner.failed_operations.fetch_add(1, Ordering::Relaxed);
        match error.category() {
            ErrorCategory::Transport => {
                self.inner.transport_errors.fetch_add(1, Ordering::Relaxed)
            }
            ErrorCategory::Corrupted => {
                self.inner.corrupted_errors.fetch_add(1, Ordering::Relaxed)
            }
            ErrorCategory::Capacity => self.inner.capacity_errors.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_retry(&self) {
        self.inner.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            successful_operations: self.inner.successful_operations.load(Ordering::Relaxed),
            failed_operations: self.inner.failed_operations.load(Ordering::Relaxed),
            total_retries: self.inner.total_retries.load(Ordering::Relaxed),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            corrupted_errors: self.inner.corrupted_errors.load(Ordering::Relaxed),
            capacity_errors: self.inner.capacity_errors.load(Ordering::Relaxed),
            bytes_moved: self.inner.bytes_moved.load(Ordering::Relaxed),
            elapsed_secs: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Emit a summary via `tracing` when there's something noteworthy, or
    /// always when `TRANSFER_STATS=verbose` is set.
    pub fn emit(&self) {
        if let Ok(val) = std::env::var("TRANSFER_STATS") {
            let lower = val.to_lowercase();
            if lower == "off" || lower == "0" || lower == "false" {
                return;
            }
        }

        let snapshot = self.snapshot();
        let verbose = std::env::var("TRANSFER_STATS")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false);

        let noteworthy =
            snapshot.total_retries > 0 || snapshot.failed_operations > 0;

        if !noteworthy && !verbose {
            return;
        }

        tracing::info!(target: "transfer_accelerator::stats", "{}", snapshot.format_summary());
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retries: u64,
    pub transport_errors: u64,
    pub corrupted_errors: u64,
    pub capacity_errors: u64,
    pub bytes_moved: u64,
    pub elapsed_secs: u64,
}

impl StatsSnapshot {
    pub fn format_summary(&self) -> String {
        format!(
            "operations: {} successful, {} failed, {} retries, {} bytes moved over {}s \
             (transport={}, corrupted={}, capacity={})",
            self.successful_operations,
            self.failed_operations,
            self.total_retries,
            self.bytes_moved,
            self.elapsed_secs,
            self.transport_errors,
            self.corrupted_errors,
            self.capacity_errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_bytes() {
        let stats = TransferStats::new();
        stats.record_success(100);
        stats.record_success(50);
        let snap = stats.snapshot();
        assert_eq!(snap.successful_operations, 2);
        assert_eq!(snap.bytes_moved, 150);
    }

    #[test]
    fn categorizes_failures() {
        let stats = TransferStats::new();
        stats.record_failure(&TransferError::Transport("timeout".into()));
        stats.record_failure(&TransferError::Corrupted("md5".into()));
        let snap = stats.snapshot();
        assert_eq!(snap.failed_operations, 2);
        assert_eq!(snap.transport_errors, 1);
        assert_eq!(snap.corrupted_errors, 1);
    }

    #[test]
    fn thread_safe_increments() {
        use std::thread;
        let stats = TransferStats::new();
        let clone = stats.clone();
        let handle = thread::spawn(move || {
            for _ in 0..100 {
                clone.record_success(1);
            }
        });
        for _ in 0..100 {
            stats.record_success(1);
        }
        handle.join().unwrap();
        assert_eq!(stats.snapshot().successful_operations, 200);
    }
}
