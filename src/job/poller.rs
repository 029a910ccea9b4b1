//! Submit → poll → resolve driver for asynchronous server jobs.
//!
//! [`JobPoller::wait`] polls a [`JobHandle`]'s status URL strictly
//! sequentially until the job reaches a terminal state. Waits between polls
//! are `tokio` timers raced against a [`CancellationToken`], and an optional
//! deadline bounds both the in-flight request and the wait.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::{JobHandle, JobStatus};
use super::state::{JobFailure, JobTracker, PollState, Transition};
use crate::kobo::{KoboClient, TransportError};

/// Poll cadence and optional deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` waits until the job resolves.
    pub timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: None,
        }
    }
}

/// Record of a job that completed.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub handle: JobHandle,
    /// Status payload of the final poll.
    pub payload: Value,
    pub polls: u32,
    pub transitions: Vec<PollState>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Waits on server jobs. Holds no per-job state, so one poller can drive
/// any number of concurrent [`JobPoller::wait`] calls.
pub struct JobPoller<'a> {
    client: &'a KoboClient,
    settings: PollSettings,
    cancel: CancellationToken,
}

impl<'a> JobPoller<'a> {
    pub fn new(client: &'a KoboClient, settings: PollSettings) -> Self {
        Self {
            client,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn wait(&self, handle: JobHandle) -> Result<JobReport, JobFailure> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = self.settings.timeout.map(|timeout| started + timeout);
        let url = handle.url().to_string();
        let mut tracker = JobTracker::new(handle);

        info!(kind = %tracker.handle().kind(), url = %url, "waiting for job");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(abort(&mut tracker, JobFailure::Cancelled));
                }
                fetched = bounded(deadline, self.fetch_status(&url)) => fetched,
            };

            let status = match fetched {
                Some(Ok(status)) => status,
                Some(Err(err)) => {
                    debug!(status = ?err.status(), "status check failed");
                    return Err(abort(&mut tracker, JobFailure::Transport(err)));
                }
                None => {
                    let waited = started.elapsed();
                    return Err(abort(&mut tracker, JobFailure::TimedOut { waited }));
                }
            };

            match tracker.observe(status) {
                Transition::Wait => {
                    debug!(
                        state = %tracker.state(),
                        polls = tracker.polls(),
                        interval_ms = self.settings.interval.as_millis() as u64,
                        "job still processing"
                    );
                }
                Transition::Complete(payload) => {
                    let completed_at = Utc::now();
                    info!(
                        kind = %tracker.handle().kind(),
                        polls = tracker.polls(),
                        "job complete"
                    );
                    return Ok(JobReport {
                        transitions: tracker.transitions(),
                        polls: tracker.polls(),
                        handle: tracker.handle().clone(),
                        payload,
                        started_at,
                        completed_at,
                        duration_ms: (completed_at - started_at).num_milliseconds(),
                    });
                }
                Transition::Fail(failure) => {
                    warn!(
                        kind = %tracker.handle().kind(),
                        polls = tracker.polls(),
                        error = %failure,
                        "job failed"
                    );
                    return Err(failure);
                }
            }

            let next_poll = Instant::now() + self.settings.interval;
            let wake = match deadline {
                Some(deadline) => next_poll.min(deadline),
                None => next_poll,
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(abort(&mut tracker, JobFailure::Cancelled));
                }
                _ = sleep_until(wake) => {}
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let waited = started.elapsed();
                return Err(abort(&mut tracker, JobFailure::TimedOut { waited }));
            }
        }
    }

    async fn fetch_status(&self, url: &str) -> Result<JobStatus, TransportError> {
        let payload: Value = self.client.get_json(url).await?;
        Ok(JobStatus::from_payload(payload))
    }
}

fn abort(tracker: &mut JobTracker, failure: JobFailure) -> JobFailure {
    warn!(
        kind = %tracker.handle().kind(),
        polls = tracker.polls(),
        error = %failure,
        "stopped waiting for job"
    );
    tracker.fail(failure)
}

/// Run `future` to completion, or until `deadline` passes (`None`).
async fn bounded<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}
