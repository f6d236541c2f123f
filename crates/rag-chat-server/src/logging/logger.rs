use flume::{bounded, Receiver, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ActivityLogConfig;
use super::types::ActivityLog;

/// Tracing target the activity records are emitted on
pub const ACTIVITY_TARGET: &str = "activity";

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max logs in memory before dropping)
    pub queue_capacity: usize,

    /// Records emitted per batch
    pub batch_size: usize,

    /// Max wait time before flushing batch (milliseconds)
    pub batch_timeout_ms: u64,

    /// Number of worker tasks draining the queue
    pub worker_count: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::from(&ActivityLogConfig::default())
    }
}

impl From<&ActivityLogConfig> for LoggerConfig {
    fn from(config: &ActivityLogConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            batch_size: config.batch_size.max(1),
            batch_timeout_ms: config.batch_timeout_ms,
            worker_count: config.worker_count.max(1),
        }
    }
}

/// Async activity logger with queue mechanism.
///
/// Callers never wait: records are queued and background workers emit them
/// in batches as JSON on the `activity` target.
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Sender<ActivityLog>,
    /// Keeps the channel connected when no worker is running
    _receiver: Receiver<ActivityLog>,
}

impl ActivityLogger {
    /// Initialize logger with background workers. Must run inside a tokio runtime.
    pub fn new(config: LoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity,
            config.batch_size,
            config.batch_timeout_ms,
            config.worker_count
        );

        for worker_id in 0..config.worker_count {
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, receiver, config).await;
            });
        }

        Self {
            sender,
            _receiver: receiver,
        }
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        if let Err(e) = self.sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    async fn worker_loop(worker_id: usize, receiver: Receiver<ActivityLog>, config: LoggerConfig) {
        debug!("Activity worker {} started", worker_id);

        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            // Block for the first record so an idle queue costs nothing
            match receiver.recv_async().await {
                Ok(log) => batch.push(log),
                Err(_) => {
                    debug!("Activity worker {} shutting down (channel closed)", worker_id);
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + batch_timeout;
            let mut closed = false;
            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            Self::flush_batch(&batch, worker_id);
            batch.clear();

            if closed {
                debug!("Activity worker {} shutting down (channel closed)", worker_id);
                return;
            }
        }
    }

    fn flush_batch(batch: &[ActivityLog], worker_id: usize) {
        for log in batch {
            match serde_json::to_string(log) {
                Ok(record) => info!(target: ACTIVITY_TARGET, worker = worker_id, "{}", record),
                Err(e) => warn!("Failed to serialize activity log: {}", e),
            }
        }
    }

    /// Get queue statistics (for monitoring)
    pub fn queue_len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_queue_full(&self) -> bool {
        self.sender.is_full()
    }
}
