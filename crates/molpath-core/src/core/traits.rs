//! Collaborator seams. The engine treats neighbor generation and scoring as opaque capabilities
//! supplied by the embedding application.

use crate::core::models::candidate::CandidateRecord;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Failed to derive a neighbor of '{key}': {reason}")]
    Generation { key: String, reason: String },

    #[error("Generated candidate '{key}' is structurally invalid: {reason}")]
    InvalidCandidate { key: String, reason: String },

    #[error("Failed to score '{key}': {reason}")]
    Scoring { key: String, reason: String },
}

/// Produces structurally-derived neighbors of a candidate.
///
/// Implementations must be safe to call concurrently for different candidates.
pub trait CandidateGenerator: Send + Sync {
    /// Derives up to `attempt_budget` neighbors of `candidate` using `operators`.
    ///
    /// Every element of the returned list is one attempt. Failed attempts are reported as
    /// errors; they are discarded and counted by the caller. Successful neighbors must carry
    /// `candidate.key` as their parent.
    fn generate(
        &self,
        candidate: &CandidateRecord,
        attempt_budget: usize,
        operators: &[String],
    ) -> Vec<Result<CandidateRecord, CollaboratorError>>;
}

/// Computes the fitness signal used for ranking and filtering.
pub trait Scorer: Send + Sync {
    fn score(&self, candidate: &CandidateRecord) -> Result<f64, CollaboratorError>;

    /// Descriptor vector for multi-objective filtering. Every component is minimized.
    ///
    /// The default implementation provides no descriptors.
    fn descriptors(&self, _candidate: &CandidateRecord) -> Result<Vec<f64>, CollaboratorError> {
        Ok(Vec::new())
    }
}
