//! Transfer metrics for a serial link
//!
//! Thread-safe counters updated by the inbound and outbound transfer loops
//! and read by the connection manager or the front end.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for one serial link
#[derive(Debug)]
pub struct LinkMetrics {
    /// Total bytes written to the device
    bytes_sent: AtomicU64,
    /// Total bytes read from the device
    bytes_received: AtomicU64,
    /// Frames written (one bulk write each)
    frames_sent: AtomicU64,
    /// Frames delivered to the handler
    frames_received: AtomicU64,
    /// Writes that moved fewer bytes than the frame held
    short_writes: AtomicU64,
    /// Bulk transfers that failed outright
    transfer_errors: AtomicU64,
    /// Reads that timed out or returned no data
    idle_reads: AtomicU64,
    /// Connection start time
    connected_at: RwLock<Option<Instant>>,
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            short_writes: AtomicU64::new(0),
            transfer_errors: AtomicU64::new(0),
            idle_reads: AtomicU64::new(0),
            connected_at: RwLock::new(None),
        }
    }

    /// Mark connection as started
    pub fn mark_connected(&self) {
        if let Ok(mut connected_at) = self.connected_at.write() {
            *connected_at = Some(Instant::now());
        }
    }

    /// Mark connection as ended
    pub fn mark_disconnected(&self) {
        if let Ok(mut connected_at) = self.connected_at.write() {
            *connected_at = None;
        }
    }

    /// Time since the link came up
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at
            .read()
            .ok()
            .and_then(|connected_at| connected_at.map(|t| t.elapsed()))
    }

    /// Record a completed bulk write of `written` out of `requested` bytes
    pub fn record_write(&self, requested: usize, written: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(written as u64, Ordering::Relaxed);
        if written < requested {
            self.short_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a frame read from the device
    pub fn record_read(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a read that produced no data
    pub fn record_idle_read(&self) {
        self.idle_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed bulk transfer
    pub fn record_error(&self) {
        self.transfer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn short_writes(&self) -> u64 {
        self.short_writes.load(Ordering::Relaxed)
    }

    pub fn transfer_errors(&self) -> u64 {
        self.transfer_errors.load(Ordering::Relaxed)
    }

    pub fn idle_reads(&self) -> u64 {
        self.idle_reads.load(Ordering::Relaxed)
    }

    /// Reset all counters, e.g. when a new connection starts
    pub fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_received.store(0, Ordering::Relaxed);
        self.short_writes.store(0, Ordering::Relaxed);
        self.transfer_errors.store(0, Ordering::Relaxed);
        self.idle_reads.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_metrics(self)
    }
}

/// Snapshot of metrics for display
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub short_writes: u64,
    pub transfer_errors: u64,
    pub idle_reads: u64,
    pub uptime: Option<Duration>,
}

impl MetricsSnapshot {
    /// Create a snapshot from LinkMetrics
    pub fn from_metrics(metrics: &LinkMetrics) -> Self {
        Self {
            bytes_sent: metrics.total_bytes_sent(),
            bytes_received: metrics.total_bytes_received(),
            frames_sent: metrics.frames_sent(),
            frames_received: metrics.frames_received(),
            short_writes: metrics.short_writes(),
            transfer_errors: metrics.transfer_errors(),
            idle_reads: metrics.idle_reads(),
            uptime: metrics.uptime(),
        }
    }

    /// Format a byte count for display
    pub fn format_bytes(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;

        if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}
