use super::StageContext;
use crate::core::models::candidate::CandidateRecord;
use crate::engine::progress::Progress;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, instrument, trace, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Neighbors produced in one iteration, unique by key.
#[derive(Debug, Default)]
pub struct GeneratedBatch {
    pub candidates: Vec<CandidateRecord>,
    /// Raw attempt count per leaf, duplicates and failures included.
    pub attempts: Vec<(String, u32)>,
    pub duplicates: usize,
}

struct LeafOutput {
    key: String,
    attempts: u32,
    neighbors: Vec<CandidateRecord>,
}

#[instrument(skip_all, name = "generate_stage", fields(leaves = leaves.len()))]
pub fn run(leaves: &[CandidateRecord], stage: &StageContext) -> GeneratedBatch {
    stage.reporter.report(Progress::PhaseStart {
        name: "Generate neighbors",
    });
    stage.reporter.report(Progress::TaskStart {
        total_steps: leaves.len() as u64,
    });

    #[cfg(not(feature = "parallel"))]
    let iterator = leaves.iter();

    #[cfg(feature = "parallel")]
    let iterator = leaves.par_iter();

    let outputs: Vec<Option<LeafOutput>> = iterator
        .map(|leaf| {
            if stage.cancel.is_cancelled() {
                return None;
            }
            let output = derive_from(leaf, stage);
            stage.reporter.report(Progress::TaskIncrement);
            Some(output)
        })
        .collect();

    let mut batch = GeneratedBatch::default();
    let mut seen = HashSet::new();
    for output in outputs.into_iter().flatten() {
        batch.attempts.push((output.key, output.attempts));
        for neighbor in output.neighbors {
            if seen.insert(neighbor.key.clone()) {
                batch.candidates.push(neighbor);
            } else {
                batch.duplicates += 1;
            }
        }
    }

    stage.reporter.report(Progress::TaskFinish);
    stage.reporter.report(Progress::PhaseFinish);
    debug!(
        candidates = batch.candidates.len(),
        duplicates = batch.duplicates,
        "Neighbors generated"
    );
    batch
}

fn derive_from(leaf: &CandidateRecord, stage: &StageContext) -> LeafOutput {
    let budget = stage.params.attempt_budget(leaf.score) as usize;
    let results = match panic::catch_unwind(AssertUnwindSafe(|| {
        stage.generator.generate(leaf, budget, stage.operators)
    })) {
        Ok(results) => results,
        Err(_) => {
            warn!(leaf = %leaf.key, "Candidate generator panicked; leaf skipped");
            stage.failures.collaborator_failed();
            return LeafOutput {
                key: leaf.key.clone(),
                attempts: 1,
                neighbors: Vec::new(),
            };
        }
    };

    let attempts = results.len() as u32;
    let neighbors = results
        .into_iter()
        .filter_map(|result| match result {
            Ok(candidate)
                if !candidate.key.is_empty()
                    && candidate.parent.as_deref() == Some(leaf.key.as_str()) =>
            {
                Some(candidate)
            }
            Ok(candidate) => {
                trace!(key = %candidate.key, leaf = %leaf.key, "Discarding neighbor with a foreign parent");
                stage.failures.collaborator_failed();
                None
            }
            Err(e) => {
                trace!(error = %e, "Neighbor generation attempt failed");
                stage.failures.collaborator_failed();
                None
            }
        })
        .collect();

    LeafOutput {
        key: leaf.key.clone(),
        attempts,
        neighbors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{CandidateGenerator, CollaboratorError};
    use crate::engine::config::SearchParams;
    use crate::engine::stages::testing::{EchoScorer, Fixture, SuffixGenerator};

    struct DuplicatingGenerator;

    impl CandidateGenerator for DuplicatingGenerator {
        fn generate(
            &self,
            candidate: &CandidateRecord,
            _attempt_budget: usize,
            _operators: &[String],
        ) -> Vec<Result<CandidateRecord, CollaboratorError>> {
            vec![
                Ok(CandidateRecord::derived("twin", candidate.key.clone())),
                Ok(CandidateRecord::derived("twin", candidate.key.clone())),
                Ok(CandidateRecord::derived(format!("{}-own", candidate.key), candidate.key.clone())),
            ]
        }
    }

    struct FlakyGenerator;

    impl CandidateGenerator for FlakyGenerator {
        fn generate(
            &self,
            candidate: &CandidateRecord,
            _attempt_budget: usize,
            _operators: &[String],
        ) -> Vec<Result<CandidateRecord, CollaboratorError>> {
            if candidate.key == "boom" {
                panic!("generator exploded");
            }
            vec![
                Err(CollaboratorError::Generation {
                    key: candidate.key.clone(),
                    reason: "no applicable operator".to_string(),
                }),
                Ok(CandidateRecord::derived("orphan", "someone-else")),
                Ok(CandidateRecord::derived("good", candidate.key.clone())),
            ]
        }
    }

    #[test]
    fn duplicates_are_dropped_but_counted_as_attempts() {
        let fixture = Fixture::new(SearchParams::default());
        let stage = fixture.stage(&DuplicatingGenerator, &EchoScorer);
        let leaves = [CandidateRecord::root("a", 1.0), CandidateRecord::root("b", 1.0)];

        let batch = run(&leaves, &stage);

        let keys: Vec<_> = batch.candidates.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["twin", "a-own", "b-own"]);
        assert_eq!(batch.duplicates, 3);
        assert_eq!(batch.attempts, vec![("a".to_string(), 3), ("b".to_string(), 3)]);
    }

    #[test]
    fn collaborator_failures_are_discarded_and_counted() {
        let fixture = Fixture::new(SearchParams::default());
        let stage = fixture.stage(&FlakyGenerator, &EchoScorer);
        let leaves = [CandidateRecord::root("boom", 1.0), CandidateRecord::root("ok", 1.0)];

        let batch = run(&leaves, &stage);

        let keys: Vec<_> = batch.candidates.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["good"]);
        assert_eq!(fixture.failures.collaborator(), 3);
        assert_eq!(batch.attempts, vec![("boom".to_string(), 1), ("ok".to_string(), 3)]);
    }

    #[test]
    fn attempt_budget_bounds_each_leaf() {
        let params = SearchParams {
            exploration_budget: 1,
            ..SearchParams::default()
        };
        let fixture = Fixture::new(params);
        let generator = SuffixGenerator {
            suffixes: vec![(".1", -0.1), (".2", 0.1)],
        };
        let stage = fixture.stage(&generator, &EchoScorer);

        let batch = run(&[CandidateRecord::root("a", 0.9)], &stage);
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].key, "a.1");
    }

    #[test]
    fn cancelled_stage_skips_remaining_leaves() {
        let fixture = Fixture::new(SearchParams::default());
        fixture.cancel.cancel();
        let generator = SuffixGenerator {
            suffixes: vec![(".1", 0.0)],
        };
        let stage = fixture.stage(&generator, &EchoScorer);

        let batch = run(&[CandidateRecord::root("a", 0.9)], &stage);
        assert!(batch.candidates.is_empty());
        assert!(batch.attempts.is_empty());
    }
}
