use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::handle::{JobHandle, JobStatus};
use crate::kobo::TransportError;

/// States a tracked job moves through.
///
/// Every job flows: SUBMITTED → PROCESSING* → COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Submitted,
    Processing,
    Completed,
    Failed,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Completed | PollState::Failed)
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Submitted => write!(f, "SUBMITTED"),
            PollState::Processing => write!(f, "PROCESSING"),
            PollState::Completed => write!(f, "COMPLETED"),
            PollState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why a job ended without a usable result.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("server did not accept the job (status {status}, expected 201)")]
    NotAccepted { status: u16 },

    #[error("job ended with status {status:?}: {detail}")]
    Rejected { status: String, detail: String },

    #[error("malformed job status: {0}")]
    Malformed(String),

    #[error("gave up waiting for the job after {}s", .waited.as_secs())]
    TimedOut { waited: Duration },

    #[error("cancelled while waiting for the job")]
    Cancelled,

    #[error("polling the job status failed: {0}")]
    Transport(#[source] TransportError),

    #[error("job already reached a terminal state")]
    AlreadyResolved,
}

/// What the poll loop must do after an observation.
#[derive(Debug)]
pub enum Transition {
    /// Still processing; wait one interval and poll again.
    Wait,
    Complete(Value),
    Fail(JobFailure),
}

/// Pure bookkeeping for one job: current state, visited states and poll count.
#[derive(Debug, Clone)]
pub struct JobTracker {
    handle: JobHandle,
    state: PollState,
    history: Vec<PollState>,
    polls: u32,
}

impl JobTracker {
    pub fn new(handle: JobHandle) -> Self {
        Self {
            handle,
            state: PollState::Submitted,
            history: Vec::new(),
            polls: 0,
        }
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Number of status observations recorded.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Every state visited so far, current one last.
    pub fn transitions(&self) -> Vec<PollState> {
        let mut states = self.history.clone();
        states.push(self.state);
        states
    }

    /// Feed one status observation. A terminal tracker ignores it.
    pub fn observe(&mut self, status: JobStatus) -> Transition {
        if self.state.is_terminal() {
            return Transition::Fail(JobFailure::AlreadyResolved);
        }
        self.polls += 1;

        match status {
            JobStatus::Processing => {
                self.enter(PollState::Processing);
                Transition::Wait
            }
            JobStatus::Complete(payload) => {
                self.enter(PollState::Completed);
                Transition::Complete(payload)
            }
            JobStatus::Failed {
                status: Some(status),
                reason,
            } => {
                self.enter(PollState::Failed);
                Transition::Fail(JobFailure::Rejected {
                    status,
                    detail: reason,
                })
            }
            JobStatus::Failed {
                status: None,
                reason,
            } => {
                self.enter(PollState::Failed);
                Transition::Fail(JobFailure::Malformed(reason))
            }
        }
    }

    /// Force a terminal failure that did not come from a status payload
    /// (deadline, cancellation, transport).
    pub fn fail(&mut self, failure: JobFailure) -> JobFailure {
        if self.state.is_terminal() {
            return JobFailure::AlreadyResolved;
        }
        self.enter(PollState::Failed);
        failure
    }

    fn enter(&mut self, next: PollState) {
        self.history.push(self.state);
        self.state = next;
    }
}
