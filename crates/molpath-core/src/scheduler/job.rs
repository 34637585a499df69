use super::auth::PasswordDigest;
use crate::core::models::ids::JobId;
use crate::engine::context::StopReason;
use crate::engine::snapshot::IterationSnapshot;
use std::sync::Arc;

/// Queue a job currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Waiting in (or at the head of) the FIFO run queue.
    Live,
    /// Paused or halted; resumable.
    Sleeping,
    /// Terminal.
    Finished,
}

/// How a finished job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Stopped(StopReason),
    Failed(String),
}

/// Transition requested for the running job, applied at its next commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopRequest {
    Pause,
    Remove,
}

pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) password: PasswordDigest,
    /// State as of the last committed iteration. Workers always start from here.
    pub(crate) committed: Arc<IterationSnapshot>,
    pub(crate) state: QueueState,
    pub(crate) outcome: Option<JobOutcome>,
    /// Consecutive failed iterations.
    pub(crate) failures: u32,
}

impl Job {
    pub(crate) fn new(id: JobId, password: PasswordDigest, committed: IterationSnapshot) -> Self {
        Self {
            id,
            password,
            committed: Arc::new(committed),
            state: QueueState::Live,
            outcome: None,
            failures: 0,
        }
    }

    pub(crate) fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            state: self.state,
            iteration: self.committed.iteration,
            candidates: self.committed.candidates.len(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Read-only view of a job for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub id: JobId,
    pub state: QueueState,
    /// Last committed iteration.
    pub iteration: u32,
    pub candidates: usize,
    pub outcome: Option<JobOutcome>,
}
