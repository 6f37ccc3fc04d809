//! Process-wide communication counters.
//!
//! Counters are relaxed atomics: cheap to bump from any thread, and
//! consistent enough for dashboards and diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Track commlink metrics without external dependencies.
pub(crate) struct Metrics;

static FRAMES_SENT: AtomicU64 = AtomicU64::new(0);
static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static CORRUPT_FRAMES: AtomicU64 = AtomicU64::new(0);
static BYTES_SENT: AtomicU64 = AtomicU64::new(0);
static BYTES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static MAIL_POSTED: AtomicU64 = AtomicU64::new(0);
static MAIL_DROPPED: AtomicU64 = AtomicU64::new(0);
static CONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static CONNECT_FAILURES: AtomicU64 = AtomicU64::new(0);
static ACTIVE_TRANSPORTS: AtomicU64 = AtomicU64::new(0);
static REQUESTS: AtomicU64 = AtomicU64::new(0);
static REQUEST_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static REQUEST_LATENCY_TOTAL_NS: AtomicU64 = AtomicU64::new(0);
static REQUEST_LATENCY_MAX_NS: AtomicU64 = AtomicU64::new(0);
static TASK_RUNS: AtomicU64 = AtomicU64::new(0);

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

impl Metrics {
    #[inline]
    pub(crate) fn record_frame_sent(payload_len: usize) {
        FRAMES_SENT.fetch_add(1, Ordering::Relaxed);
        BYTES_SENT.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_frame_received(payload_len: usize) {
        FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
        BYTES_RECEIVED.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_corrupt_frame() {
        CORRUPT_FRAMES.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_mail_posted() {
        MAIL_POSTED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_mail_dropped() {
        MAIL_DROPPED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connect(success: bool) {
        CONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
        if !success {
            CONNECT_FAILURES.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_transport_open() {
        ACTIVE_TRANSPORTS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_transport_close() {
        ACTIVE_TRANSPORTS.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_request(duration: Duration, timed_out: bool) {
        REQUESTS.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            REQUEST_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let nanos = duration
            .as_nanos()
            .min(u128::from(u64::MAX))
            .try_into()
            .unwrap_or(u64::MAX);
        REQUEST_LATENCY_TOTAL_NS.fetch_add(nanos, Ordering::Relaxed);
        update_max(&REQUEST_LATENCY_MAX_NS, nanos);
    }

    #[inline]
    pub(crate) fn record_task_run() {
        TASK_RUNS.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: FRAMES_SENT.load(Ordering::Relaxed),
            frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
            corrupt_frames: CORRUPT_FRAMES.load(Ordering::Relaxed),
            bytes_sent: BYTES_SENT.load(Ordering::Relaxed),
            bytes_received: BYTES_RECEIVED.load(Ordering::Relaxed),
            mail_posted: MAIL_POSTED.load(Ordering::Relaxed),
            mail_dropped: MAIL_DROPPED.load(Ordering::Relaxed),
            connect_attempts: CONNECT_ATTEMPTS.load(Ordering::Relaxed),
            connect_failures: CONNECT_FAILURES.load(Ordering::Relaxed),
            active_transports: ACTIVE_TRANSPORTS.load(Ordering::Relaxed),
            requests: REQUESTS.load(Ordering::Relaxed),
            request_timeouts: REQUEST_TIMEOUTS.load(Ordering::Relaxed),
            request_latency_total_ns: REQUEST_LATENCY_TOTAL_NS.load(Ordering::Relaxed),
            request_latency_max_ns: REQUEST_LATENCY_MAX_NS.load(Ordering::Relaxed),
            task_runs: TASK_RUNS.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Read the current process-wide counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    Metrics::totals()
}

/// Lightweight snapshot of the communication counters.
#[allow(missing_docs)]
#[derive(Default, Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub corrupt_frames: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub mail_posted: u64,
    pub mail_dropped: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub active_transports: u64,
    pub requests: u64,
    pub request_timeouts: u64,
    pub request_latency_total_ns: u64,
    pub request_latency_max_ns: u64,
    pub task_runs: u64,
}

impl MetricsSnapshot {
    /// Average latency of successful requests in microseconds.
    #[must_use]
    pub fn avg_request_latency_us(&self) -> Option<u64> {
        let completed = self.requests.saturating_sub(self.request_timeouts);
        if completed == 0 {
            return None;
        }

        let total_ns = u128::from(self.request_latency_total_ns);
        Some((total_ns / (u128::from(completed) * NANOSECONDS_PER_MICROSECOND)) as u64)
    }
}
