//! Per-messenger delivery metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for a single messenger, shared between its handle and worker
#[derive(Debug, Default)]
pub struct MessengerMetrics {
    /// Successful deliveries
    sent_count: AtomicU64,
    /// Failed deliveries (message-class, marshalling, disposal)
    failed_count: AtomicU64,
    /// Messages dropped from a full resend queue
    dropped_count: AtomicU64,
    /// Retry rounds attempted while in error state
    retry_count: AtomicU64,
    /// Current resend queue depth
    queue_len: AtomicUsize,
}

impl MessengerMetrics {
    /// Create a zeroed metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful deliveries
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    /// Record a successful delivery
    pub fn inc_sent(&self) {
        self.sent_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total failed deliveries
    pub fn failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::Relaxed)
    }

    /// Record a failed delivery
    pub fn inc_failed(&self) {
        self.failed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total messages dropped from the resend queue
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Record a dropped message
    pub fn inc_dropped(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total retry rounds
    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Record a retry round
    pub fn inc_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Current resend queue depth
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    /// Update the resend queue depth
    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot for reporting
    pub fn snapshot(&self) -> MessengerMetricsSnapshot {
        MessengerMetricsSnapshot {
            sent_count: self.sent_count(),
            failed_count: self.failed_count(),
            dropped_count: self.dropped_count(),
            retry_count: self.retry_count(),
            queue_len: self.queue_len(),
        }
    }
}

/// Point-in-time copy of a messenger's counters
#[derive(Debug, Clone, Copy)]
pub struct MessengerMetricsSnapshot {
    pub sent_count: u64,
    pub failed_count: u64,
    pub dropped_count: u64,
    pub retry_count: u64,
    pub queue_len: usize,
}
