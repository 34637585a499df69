use super::config::{ConfigError, SearchParams};
use super::snapshot::IterationSnapshot;
use crate::core::models::candidate::CandidateRecord;
use crate::core::models::ids::JobId;
use crate::core::tree::{CandidateTree, TreeError};
use std::collections::HashMap;
use std::time::Duration;

/// Why a job stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IterationLimit,
    TimeLimit,
    GoalReached,
    Cancelled,
}

impl StopReason {
    /// Exhaustion is a natural end; cancellation leaves the job resumable.
    pub fn is_exhaustion(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Mutable state of one search job.
///
/// A context owns exactly one [`CandidateTree`] and one parameter block. Per-iteration scratch
/// data (leaf lists, generated batches, survivor flags) lives inside the pipeline and is never
/// persisted.
pub struct SearchContext {
    pub job_id: JobId,
    pub params: SearchParams,
    pub operators: Vec<String>,
    pub tree: CandidateTree,
    /// Number of completed iterations.
    pub iteration: u32,
    pub elapsed: Duration,
    /// Node at which ancestor walks stop in multi-source searches.
    pub anchor: Option<String>,
}

impl SearchContext {
    /// Creates an unscheduled context seeded with `roots`.
    pub fn new(
        params: SearchParams,
        operators: Vec<String>,
        roots: impl IntoIterator<Item = CandidateRecord>,
    ) -> Result<Self, TreeError> {
        Ok(Self {
            job_id: JobId::default(),
            params,
            operators,
            tree: CandidateTree::from_roots(roots)?,
            iteration: 0,
            elapsed: Duration::ZERO,
            anchor: None,
        })
    }

    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Structural check performed before a context is accepted as a job.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.params.validate()?;
        if self.operators.is_empty() {
            return Err(ConfigError::MissingParameter("operators"));
        }
        if self.tree.roots().is_empty() {
            return Err(ConfigError::MissingParameter("roots"));
        }
        Ok(())
    }

    /// Budget-driven termination; `None` while the job may keep iterating.
    pub fn budget_exhausted(&self) -> Option<StopReason> {
        if self.iteration >= self.params.max_iterations {
            Some(StopReason::IterationLimit)
        } else if self.elapsed >= Duration::from_secs(self.params.max_seconds) {
            Some(StopReason::TimeLimit)
        } else {
            None
        }
    }

    pub fn goal_reached(&self) -> bool {
        self.params
            .goal_key
            .as_deref()
            .is_some_and(|goal| self.tree.contains(goal))
    }

    /// Keys from a root down to `key`.
    pub fn path_to(&self, key: &str) -> Result<Vec<String>, TreeError> {
        self.tree.path_to(key)
    }

    pub fn to_snapshot(&self) -> IterationSnapshot {
        IterationSnapshot {
            job_id: self.job_id,
            iteration: self.iteration,
            elapsed_seconds: self.elapsed.as_secs_f64(),
            params: self.params.clone(),
            operators: self.operators.clone(),
            roots: self.tree.roots().to_vec(),
            anchor: self.anchor.clone(),
            candidates: self.tree.records(),
            derivations: self.tree.derivation_map().clone(),
            pruned: self.tree.pruned_this_iteration().to_vec(),
        }
    }

    pub fn from_snapshot(snapshot: IterationSnapshot) -> Result<Self, TreeError> {
        let derivations: HashMap<String, u32> = snapshot.derivations;
        let tree = CandidateTree::from_parts(
            snapshot.roots,
            snapshot.candidates.into_values(),
            derivations,
            snapshot.pruned,
        )?;
        Ok(Self {
            job_id: snapshot.job_id,
            params: snapshot.params,
            operators: snapshot.operators,
            tree,
            iteration: snapshot.iteration,
            elapsed: Duration::try_from_secs_f64(snapshot.elapsed_seconds).unwrap_or_default(),
            anchor: snapshot.anchor,
        })
    }
}
