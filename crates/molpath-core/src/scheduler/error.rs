use super::job::QueueState;
use crate::core::models::ids::JobId;
use crate::core::tree::TreeError;
use crate::engine::config::ConfigError;
use crate::engine::snapshot::SnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job {0} does not exist")]
    JobNotFound(JobId),

    #[error("Wrong password for job {0}")]
    Unauthorized(JobId),

    #[error("Job {job} is {state:?}; operation '{operation}' is not allowed")]
    InvalidState {
        job: JobId,
        state: QueueState,
        operation: &'static str,
    },

    #[error("Job {0} is currently running")]
    JobRunning(JobId),

    #[error("Job definition rejected: {source}")]
    InvalidJob {
        #[from]
        source: ConfigError,
    },

    #[error("Snapshot cannot be restored: {source}")]
    InvalidSnapshot {
        #[from]
        source: TreeError,
    },

    #[error("No snapshot for iteration {iteration} of job {job}")]
    HistoryNotFound { job: JobId, iteration: u32 },

    #[error("Snapshot store failure: {source}")]
    Store {
        #[from]
        source: SnapshotError,
    },

    #[error("Scheduler has been halted")]
    Halted,
}
