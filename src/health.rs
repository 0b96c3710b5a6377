//! Shard health
//!
//! Per-shard error counters and the process-wide error-log rate limit.
//!
//! ## Responsibilities
//! - Count every failure attributed to a shard
//! - Decide when a shard has failed often enough to be rebuilt
//! - Allow at most one warning-level error log per interval, across all shards
//!
//! All state is atomic; no locks are taken on the error path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of recording one error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorVerdict {
    /// Errors counted against the shard before this one
    pub previous: u64,
    /// This error won the log slot for the current interval
    pub should_log: bool,
    /// The shard crossed the rebuild threshold; the counter has been reset
    pub should_rebuild: bool,
}

/// Error bookkeeping for every shard
pub struct ShardHealth {
    /// One counter per shard, reset on (re)build
    counters: Vec<AtomicU64>,
    /// Unix millis of the last warning-level log
    last_log_ms: AtomicU64,
    log_interval_ms: u64,
    /// 0 disables automatic rebuilds
    rebuild_after: u64,
}

impl ShardHealth {
    pub fn new(shards: usize, log_interval_ms: u64, rebuild_after: u64) -> Self {
        Self {
            counters: (0..shards).map(|_| AtomicU64::new(0)).collect(),
            last_log_ms: AtomicU64::new(0),
            log_interval_ms,
            rebuild_after,
        }
    }

    /// Count one error against `shard`
    pub fn record(&self, shard: usize) -> ErrorVerdict {
        let should_log = self.claim_log_slot(now_millis());

        let Some(counter) = self.counters.get(shard) else {
            return ErrorVerdict {
                previous: 0,
                should_log,
                should_rebuild: false,
            };
        };

        let previous = counter.fetch_add(1, Ordering::AcqRel);
        let count = previous + 1;

        // Only the thread that resets the counter triggers the rebuild
        let should_rebuild = self.rebuild_after > 0
            && count > self.rebuild_after
            && counter
                .compare_exchange(count, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        ErrorVerdict {
            previous,
            should_log,
            should_rebuild,
        }
    }

    /// Zero a shard's counter (after a build or a disposal)
    pub fn reset(&self, shard: usize) {
        if let Some(counter) = self.counters.get(shard) {
            counter.store(0, Ordering::Release);
        }
    }

    /// Current error count of a shard
    pub fn count(&self, shard: usize) -> u64 {
        self.counters
            .get(shard)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn shards(&self) -> usize {
        self.counters.len()
    }

    fn claim_log_slot(&self, now: u64) -> bool {
        let last = self.last_log_ms.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < self.log_interval_ms {
            return false;
        }
        self.last_log_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
