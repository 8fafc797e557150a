//! Waiting for remote jobs to reach a terminal state.
//!
//! The poller queries a [`StatusSource`] until the job reports `completed`
//! (success) or `failed` (`JobFailed`). Between queries it sleeps for the
//! interval produced by a `backoff` policy; by default that is a constant
//! 500 ms with no limit on attempts. Both the status request and the sleep
//! race against a [`CancellationToken`], so cancellation drops any in-flight
//! request immediately.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoff;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{ChifError, Result};

/// Default delay between status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Server-side queue state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Any value this client does not know; treated as still running.
    Other(String),
}

impl QueueStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status report for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub queue_status: QueueStatus,
    /// The task document exactly as the service returned it.
    pub task: Value,
}

impl JobStatus {
    pub fn from_task(task: Value) -> Self {
        let queue_status = task
            .get("queue_status")
            .and_then(Value::as_str)
            .map(QueueStatus::parse)
            .unwrap_or_else(|| QueueStatus::Other(String::new()));
        Self { queue_status, task }
    }

    /// Pick the task out of a `check_files` response (an array whose first
    /// element is the task of interest).
    pub fn from_response(body: Value) -> Result<Self> {
        match body {
            Value::Array(tasks) => tasks
                .into_iter()
                .next()
                .map(Self::from_task)
                .ok_or_else(|| ChifError::UnexpectedResponse {
                    operation: "status",
                    reason: "empty task list".into(),
                }),
            other => Err(ChifError::UnexpectedResponse {
                operation: "status",
                reason: format!("expected an array, got {other}"),
            }),
        }
    }
}

/// Anything that can report the status of a job.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn job_status(&self, uuid: &str) -> Result<JobStatus>;
}

/// Interval strategy between status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    /// Same delay every time.
    Fixed(Duration),
    /// Growing delay, starting at `initial` and capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

/// Poller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: PollInterval,
    /// Give up after this many status queries.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed.
    pub max_wait: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: PollInterval::Fixed(DEFAULT_POLL_INTERVAL),
            max_attempts: None,
            max_wait: None,
        }
    }
}

impl PollOptions {
    fn build_backoff(&self) -> Box<dyn Backoff + Send> {
        match self.interval {
            PollInterval::Fixed(interval) => Box::new(Constant::new(interval)),
            PollInterval::Exponential { initial, max } => {
                let mut backoff = ExponentialBackoff {
                    initial_interval: initial,
                    current_interval: initial,
                    max_interval: max,
                    max_elapsed_time: None,
                    ..Default::default()
                };
                backoff.reset();
                Box::new(backoff)
            }
        }
    }
}

/// Polls a [`StatusSource`] until a job finishes.
pub struct StatusPoller<'a, S: StatusSource + ?Sized> {
    source: &'a S,
    options: PollOptions,
    cancel: CancellationToken,
}

impl<'a, S: StatusSource + ?Sized> StatusPoller<'a, S> {
    pub fn new(source: &'a S, options: PollOptions, cancel: CancellationToken) -> Self {
        Self {
            source,
            options,
            cancel,
        }
    }

    /// Wait until `uuid` is `completed`, returning its final status.
    #[instrument(level = "info", skip(self), fields(max_attempts = ?self.options.max_attempts))]
    pub async fn wait(&self, uuid: &str) -> Result<JobStatus> {
        let start = Instant::now();
        let mut backoff = self.options.build_backoff();
        let mut attempts: u32 = 0;

        info!("Waiting on task");
        loop {
            attempts += 1;
            let status = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(uuid, attempts)),
                status = self.source.job_status(uuid) => status?,
            };
            debug!(attempt = attempts, status = %status.queue_status, "Polled task");

            match status.queue_status {
                QueueStatus::Completed => {
                    info!(
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Task completed"
                    );
                    return Ok(status);
                }
                QueueStatus::Failed => {
                    warn!(attempts, "Task failed");
                    return Err(ChifError::JobFailed {
                        uuid: uuid.to_string(),
                    });
                }
                _ => {}
            }

            let timeout = || ChifError::JobTimeout {
                uuid: uuid.to_string(),
                attempts,
                elapsed: start.elapsed(),
            };
            if self.options.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(timeout());
            }
            let mut delay = backoff.next_backoff().ok_or_else(timeout)?;
            if let Some(max_wait) = self.options.max_wait {
                let remaining = max_wait.saturating_sub(start.elapsed());
                if remaining.is_zero() {
                    return Err(timeout());
                }
                delay = delay.min(remaining);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(uuid, attempts)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self, uuid: &str, attempts: u32) -> ChifError {
        warn!(uuid, attempts, "Stopped waiting on task: cancelled");
        ChifError::Cancelled
    }
}
