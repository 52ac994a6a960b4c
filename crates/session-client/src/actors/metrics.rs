//! Session metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds for the session actor:
//!
//! | Normal | Warning | Critical |
//! |--------|---------|----------|
//! | < 50   | 50-150  | > 150    |
//!
//! Flow counters track every publish/subscribe attempt from start to its
//! single terminal outcome. All values are lock-free atomics so handles can
//! read them while the actor updates them.

use super::flow::FlowKind;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the session actor.
pub const SESSION_MAILBOX_NORMAL: usize = 50;
pub const SESSION_MAILBOX_WARNING: usize = 150;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Session client instance id.
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Peak mailbox depth since last reset.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        let level = Self::level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "sc.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = SESSION_MAILBOX_WARNING,
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == SESSION_MAILBOX_NORMAL + 1 {
            // Log once when crossing the warning threshold
            debug!(
                target: "sc.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        Self::level_for_depth(self.current_depth())
    }

    fn level_for_depth(depth: usize) -> MailboxLevel {
        if depth > SESSION_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > SESSION_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Counters for handshake flows.
#[derive(Debug, Default)]
pub struct FlowMetrics {
    started: AtomicU64,
    ready: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
}

/// Snapshot of flow counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMetricsSnapshot {
    pub started: u64,
    pub ready: u64,
    pub failed: u64,
    pub aborted: u64,
}

impl FlowMetricsSnapshot {
    /// Flows started but not yet resolved.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.started
            .saturating_sub(self.ready + self.failed + self.aborted)
    }
}

impl FlowMetrics {
    pub fn flow_started(&self, kind: FlowKind) {
        self.started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "sc.actor.session", kind = kind.as_str(), "Flow started");
    }

    pub fn flow_ready(&self) {
        self.ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flow_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flow_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> FlowMetricsSnapshot {
        FlowMetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            ready: self.ready.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

/// Metrics shared between a session actor and its handles.
#[derive(Debug)]
pub struct SessionMetrics {
    pub mailbox: MailboxMonitor,
    pub flows: FlowMetrics,
}

impl SessionMetrics {
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            mailbox: MailboxMonitor::new(actor_id),
            flows: FlowMetrics::default(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new("sc-test");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("sc-test");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..75 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..100 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new("sc-test");
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_flow_metrics_snapshot() {
        let metrics = FlowMetrics::default();

        metrics.flow_started(FlowKind::Publish);
        metrics.flow_started(FlowKind::Subscribe);
        metrics.flow_started(FlowKind::Subscribe);
        metrics.flow_ready();
        metrics.flow_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot,
            FlowMetricsSnapshot {
                started: 3,
                ready: 1,
                failed: 1,
                aborted: 0,
            }
        );
        assert_eq!(snapshot.in_flight(), 1);

        metrics.flow_aborted();
        assert_eq!(metrics.snapshot().in_flight(), 0);
    }
}
