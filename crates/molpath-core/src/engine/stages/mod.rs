//! The stages of one search iteration.
//!
//! Each stage is data-parallel internally, but stages run strictly one after another: the output
//! of a stage is fully materialized before the next one starts. The
//! [`IterationPipeline`](super::pipeline::IterationPipeline) drives them in order:
//!
//! 1. [`find_leaves`] - collect leaves and age every non-root record,
//! 2. [`generate`] - derive neighbors of each leaf and deduplicate them,
//! 3. [`score`] - score the batch in-process and optionally through a script,
//! 4. [`filter`] - weight, uniqueness, script and re-derivation predicates,
//! 5. [`pareto`] - optional iterative non-domination filter,
//! 6. [`accept`] - order-preserving, capped insertion into the tree,
//! 7. [`update_tree`] - reset improvement counters along improved ancestor chains,
//! 8. [`prune`] - erase stale or externally rejected branches.

pub mod accept;
pub mod filter;
pub mod find_leaves;
pub mod generate;
pub mod pareto;
pub mod prune;
pub mod score;
pub mod update_tree;

use super::cancel::CancellationToken;
use super::config::SearchParams;
use super::progress::ProgressReporter;
use crate::core::models::ids::JobId;
use crate::core::traits::{CandidateGenerator, Scorer};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-item failures recovered during an iteration. Reported once when the iteration ends.
#[derive(Debug, Default)]
pub struct FailureCounters {
    collaborator: AtomicUsize,
    missing_records: AtomicUsize,
}

impl FailureCounters {
    #[inline]
    pub fn collaborator_failed(&self) {
        self.collaborator.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_missing(&self) {
        self.missing_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn collaborator(&self) -> usize {
        self.collaborator.load(Ordering::Relaxed)
    }

    pub fn missing_records(&self) -> usize {
        self.missing_records.load(Ordering::Relaxed)
    }
}

/// Read-only inputs shared by the stages of one iteration.
pub struct StageContext<'a> {
    pub job_id: JobId,
    /// Index of the iteration being computed (1-based).
    pub iteration: u32,
    pub params: &'a SearchParams,
    pub operators: &'a [String],
    pub generator: &'a dyn CandidateGenerator,
    pub scorer: &'a dyn Scorer,
    pub cancel: &'a CancellationToken,
    pub reporter: &'a ProgressReporter<'a>,
    pub failures: &'a FailureCounters,
    pub scratch_dir: &'a Path,
}

impl StageContext<'_> {
    /// Working directory for a script exchange of this iteration.
    pub fn script_dir(&self, purpose: &str) -> PathBuf {
        crate::core::io::script::work_dir(self.scratch_dir, self.job_id, self.iteration, purpose)
    }
}
