//! # Workflows Module
//!
//! High-level entry points that bind the [`JobScheduler`](crate::scheduler::JobScheduler) to the
//! [`IterationPipeline`](crate::engine::pipeline::IterationPipeline).
//!
//! - **Search worker** ([`search`]) - leases jobs one at a time, drains their deferred commands,
//!   runs iterations and commits or aborts each one until the scheduler signals termination.

pub mod search;
