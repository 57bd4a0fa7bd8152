//! 电话服务计数器：外呼、结果、超时与被拒的 webhook
//!
//! 原子计数，任意任务可并发累加；`/metrics` 返回一份快照。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::calls::CallStatus;

#[derive(Debug)]
pub struct CallMetrics {
    calls_placed: AtomicU64,
    placement_failures: AtomicU64,
    results_received: AtomicU64,
    results_completed: AtomicU64,
    waits_timed_out: AtomicU64,
    payloads_rejected: AtomicU64,
    started: Instant,
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self {
            calls_placed: AtomicU64::new(0),
            placement_failures: AtomicU64::new(0),
            results_received: AtomicU64::new(0),
            results_completed: AtomicU64::new(0),
            waits_timed_out: AtomicU64::new(0),
            payloads_rejected: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

/// 某一时刻的计数快照；active/pending/stored 由服务填入
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub calls_placed: u64,
    pub placement_failures: u64,
    pub results_received: u64,
    pub results_completed: u64,
    pub waits_timed_out: u64,
    pub payloads_rejected: u64,
    pub active_calls: usize,
    pub pending_waiters: usize,
    pub stored_results: usize,
    pub uptime_secs: f64,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_placed(&self) {
        self.calls_placed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_placement_failure(&self) {
        self.placement_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self, status: CallStatus) {
        self.results_received.fetch_add(1, Ordering::Relaxed);
        if status == CallStatus::Completed {
            self.results_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_timeout(&self) {
        self.waits_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_payload(&self) {
        self.payloads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        active_calls: usize,
        pending_waiters: usize,
        stored_results: usize,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_placed: self.calls_placed.load(Ordering::Relaxed),
            placement_failures: self.placement_failures.load(Ordering::Relaxed),
            results_received: self.results_received.load(Ordering::Relaxed),
            results_completed: self.results_completed.load(Ordering::Relaxed),
            waits_timed_out: self.waits_timed_out.load(Ordering::Relaxed),
            payloads_rejected: self.payloads_rejected.load(Ordering::Relaxed),
            active_calls,
            pending_waiters,
            stored_results,
            uptime_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = CallMetrics::new();
        m.record_placed();
        m.record_placed();
        m.record_placement_failure();
        m.record_result(CallStatus::Completed);
        m.record_result(CallStatus::NoAnswer);
        m.record_timeout();

        let s = m.snapshot(1, 2, 3);
        assert_eq!(s.calls_placed, 2);
        assert_eq!(s.placement_failures, 1);
        assert_eq!(s.results_received, 2);
        assert_eq!(s.results_completed, 1);
        assert_eq!(s.waits_timed_out, 1);
        assert_eq!(s.payloads_rejected, 0);
        assert_eq!((s.active_calls, s.pending_waiters, s.stored_results), (1, 2, 3));
    }
}
