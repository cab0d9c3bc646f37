//! Progress and debug hooks for benchmark runs
//!
//! Observers are called synchronously from runner tasks and must not block. They
//! cannot influence the run: events are fire-and-forget.

use crate::types::{OperationResult, OperationType};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Default buffer for [`ChannelObserver::channel`]
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event of one benchmark unit
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Provider call about to start
    TaskStarted {
        test_name: String,
        provider: String,
        operation: OperationType,
        iteration: usize,
    },
    TaskSkipped(OperationResult),
    TaskCompleted(OperationResult),
    TaskFailed(OperationResult),
    /// Emitted after every recorded result
    Progress { completed: usize, total: usize },
}

impl RunEvent {
    /// Result carried by terminal events
    pub fn result(&self) -> Option<&OperationResult> {
        match self {
            Self::TaskSkipped(r) | Self::TaskCompleted(r) | Self::TaskFailed(r) => Some(r),
            Self::TaskStarted { .. } | Self::Progress { .. } => None,
        }
    }
}

/// Receives run events
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn on_event(&self, _event: &RunEvent) {}
}

/// Writes events to `tracing` at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::TaskStarted {
                test_name,
                provider,
                operation,
                iteration,
            } => tracing::debug!(test = %test_name, provider = %provider, operation = %operation, iteration, "task started"),
            RunEvent::TaskSkipped(r) => tracing::debug!(
                test = %r.test_name,
                provider = %r.provider,
                reason = r.skip_reason.as_deref().unwrap_or_default(),
                "task skipped"
            ),
            RunEvent::TaskCompleted(r) => tracing::debug!(
                test = %r.test_name,
                provider = %r.provider,
                latency_ms = r.latency.as_millis() as u64,
                quality = r.quality_score,
                "task completed"
            ),
            RunEvent::TaskFailed(r) => tracing::debug!(
                test = %r.test_name,
                provider = %r.provider,
                category = r.error_category.map(|c| c.as_str()).unwrap_or("unknown"),
                error = r.error.as_deref().unwrap_or_default(),
                "task failed"
            ),
            RunEvent::Progress { completed, total } => tracing::debug!(completed, total, "progress"),
        }
    }
}

/// Forwards events into a bounded channel, dropping them when the receiver lags
#[derive(Debug)]
pub struct ChannelObserver {
    sender: mpsc::Sender<RunEvent>,
    dropped: AtomicU64,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<RunEvent>) -> Self {
        Self {
            sender,
            dropped: AtomicU64::new(0),
        }
    }

    /// Observer plus the receiving end, with the default capacity
    pub fn channel() -> (Self, mpsc::Receiver<RunEvent>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }

    /// Events lost because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RunObserver for ChannelObserver {
    fn on_event(&self, event: &RunEvent) {
        if self.sender.try_send(event.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
