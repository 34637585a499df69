//! # Engine Module
//!
//! The search engine: everything needed to advance one job by one iteration.
//!
//! ## Overview
//!
//! A job's state is a [`context::SearchContext`] (parameters, operator set, candidate tree,
//! counters). The [`pipeline::IterationPipeline`] runs the stages in [`stages`] over that
//! context, one barrier after another, and returns an [`pipeline::IterationReport`] saying
//! whether the job may continue. The scheduler persists each committed context as a
//! [`snapshot::IterationSnapshot`].
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - The parameter block, its builder and validation
//! - **Context** ([`context`]) - Per-job mutable state and termination checks
//! - **Stages** ([`stages`]) - The individual, internally parallel pipeline stages
//! - **Pipeline** ([`pipeline`]) - Stage ordering, cancellation checks and reporting
//! - **Snapshots** ([`snapshot`]) - Checkpoint records and their stores
//! - **Cancellation** ([`cancel`]) - Cooperative stop flag shared with the scheduler
//! - **Progress Monitoring** ([`progress`]) - Progress events for front ends
//! - **Error Handling** ([`error`]) - Engine-level error taxonomy

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod snapshot;
pub mod stages;
