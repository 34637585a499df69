//! Job lifecycle management.
//!
//! [`JobScheduler`] keeps every submitted search job in one of three queues (live, sleeping,
//! finished), leases the head of the live queue to a single worker and commits the worker's
//! results. Client operations are password-checked and never mutate a leased context in place.

pub mod auth;
pub mod deferred;
pub mod error;
pub mod job;
pub mod manager;

pub use deferred::{DeferredAction, DeferredBatch};
pub use error::SchedulerError;
pub use job::{JobOutcome, JobSummary, QueueState};
pub use manager::{JobLease, JobScheduler};
