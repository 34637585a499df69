//! # Molpath Core Library
//!
//! A concurrent, iterative tree-search engine for exploring combinatorial spaces of candidate
//! structures, together with a scheduler that multiplexes many independent searches ("jobs")
//! onto a single worker.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict layered architecture so that each concern can be tested on its own.
//!
//! - **[`core`]: The Foundation.** Candidate records, the concurrent [`core::tree::CandidateTree`]
//!   with per-key accessor locking, the collaborator traits (`CandidateGenerator`, `Scorer`) and
//!   the I/O utilities (snapshot stores, subprocess script exchange).
//!
//! - **[`engine`]: The Search Logic.** Parameters, the per-job [`engine::context::SearchContext`],
//!   and the [`engine::pipeline::IterationPipeline`], which executes the ordered stage sequence
//!   (leaf discovery, neighbor generation, scoring, filtering, Pareto filtering, acceptance,
//!   tree update and pruning) once per iteration.
//!
//! - **[`scheduler`]: Job Lifecycle.** The [`scheduler::JobScheduler`] owns every job, its live,
//!   sleeping and finished queues, password-gated control operations and the deferred command
//!   queue drained at iteration start.
//!
//! - **[`workflows`]: The Public Entry Point.** The worker loop that fetches jobs from the
//!   scheduler, runs iterations and commits their results.

pub mod core;
pub mod engine;
pub mod scheduler;
pub mod workflows;
