use crate::core::models::candidate::CandidateRecord;
use crate::core::tree::{CandidateTree, TreeError};
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::{debug, instrument, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const CHUNK_SIZE: usize = 256;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AcceptReport {
    /// Inserted keys, in rank order.
    pub accepted: Vec<String>,
    /// Parents that gained at least one child.
    pub modified_parents: BTreeSet<String>,
}

/// Inserts survivors into the tree, in input order, until `cap` survivors have been ranked.
///
/// A survivor's rank is the number of survivors before it. Ranks are assigned with a two-phase
/// scan so that chunks can be committed in parallel while the outcome stays identical to a
/// sequential pass:
///
/// 1. count survivors per chunk,
/// 2. turn the counts into per-chunk starting ranks with an exclusive prefix sum,
/// 3. commit every chunk, inserting survivors whose rank is below the cap.
///
/// A committed candidate is registered in its parent's current and historic children.
///
/// # Errors
///
/// Returns a [`TreeError`] if a candidate has no parent or its parent is missing.
#[instrument(skip_all, name = "accept_stage", fields(candidates = candidates.len()))]
pub fn run(
    candidates: &[CandidateRecord],
    survivors: &[bool],
    cap: Option<usize>,
    tree: &CandidateTree,
    iteration: u32,
) -> Result<AcceptReport, TreeError> {
    let len = candidates.len().min(survivors.len());
    let chunk_count = len.div_ceil(CHUNK_SIZE);
    let bounds = |chunk: usize| -> Range<usize> {
        chunk * CHUNK_SIZE..((chunk + 1) * CHUNK_SIZE).min(len)
    };

    // === Phase 1: local survivor counts ===
    #[cfg(not(feature = "parallel"))]
    let chunks = 0..chunk_count;
    #[cfg(feature = "parallel")]
    let chunks = (0..chunk_count).into_par_iter();

    let counts: Vec<usize> = chunks
        .map(|chunk| survivors[bounds(chunk)].iter().filter(|alive| **alive).count())
        .collect();

    // === Phase 2: exclusive prefix over chunk counts ===
    let offsets: Vec<usize> = counts
        .iter()
        .scan(0usize, |running, count| {
            let start = *running;
            *running += count;
            Some(start)
        })
        .collect();

    // === Phase 3: commit guarded by the prefix ===
    #[cfg(not(feature = "parallel"))]
    let chunks = 0..chunk_count;
    #[cfg(feature = "parallel")]
    let chunks = (0..chunk_count).into_par_iter();

    let committed: Vec<Result<Vec<(String, String)>, TreeError>> = chunks
        .map(|chunk| {
            let mut rank = offsets[chunk];
            let mut inserted = Vec::new();
            for idx in bounds(chunk) {
                if !survivors[idx] {
                    continue;
                }
                if cap.is_some_and(|cap| rank >= cap) {
                    break;
                }
                rank += 1;

                let candidate = &candidates[idx];
                let parent = candidate.parent.clone().ok_or_else(|| {
                    TreeError::Inconsistent(format!(
                        "generated candidate '{}' has no parent",
                        candidate.key
                    ))
                })?;
                if !tree.insert_if_absent(candidate.clone().into_fresh_record(iteration)) {
                    trace!(key = %candidate.key, "Candidate already present; not re-inserted");
                    continue;
                }
                tree.attach_child(&parent, &candidate.key)?;
                inserted.push((candidate.key.clone(), parent));
            }
            Ok(inserted)
        })
        .collect();

    let mut report = AcceptReport::default();
    for chunk in committed {
        for (key, parent) in chunk? {
            report.accepted.push(key);
            report.modified_parents.insert(parent);
        }
    }
    debug!(
        accepted = report.accepted.len(),
        parents = report.modified_parents.len(),
        "Candidates accepted"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> CandidateTree {
        CandidateTree::from_roots([
            CandidateRecord::root("p", 1.0),
            CandidateRecord::root("q", 1.0),
        ])
        .unwrap()
    }

    fn candidates(count: usize) -> Vec<CandidateRecord> {
        (0..count)
            .map(|idx| {
                let parent = if idx % 2 == 0 { "p" } else { "q" };
                CandidateRecord::derived(format!("s{idx}"), parent)
            })
            .collect()
    }

    #[test]
    fn cap_keeps_the_first_survivors_in_input_order() {
        let tree = tree();
        let batch = candidates(5);

        let report = run(&batch, &[true; 5], Some(2), &tree, 1).unwrap();

        assert_eq!(report.accepted, vec!["s0", "s1"]);
        assert!(tree.contains("s0") && tree.contains("s1"));
        assert!(!tree.contains("s2") && !tree.contains("s4"));
        assert_eq!(tree.len(), 4);
        assert_eq!(
            report.modified_parents,
            BTreeSet::from(["p".to_string(), "q".to_string()])
        );
    }

    #[test]
    fn rank_skips_non_survivors_across_chunk_boundaries() {
        let tree = tree();
        let batch = candidates(3 * CHUNK_SIZE);
        let survivors: Vec<bool> = (0..batch.len()).map(|idx| idx % 3 == 0).collect();

        let report = run(&batch, &survivors, Some(CHUNK_SIZE / 2 + 7), &tree, 1).unwrap();

        let expected: Vec<String> = (0..batch.len())
            .filter(|idx| idx % 3 == 0)
            .take(CHUNK_SIZE / 2 + 7)
            .map(|idx| format!("s{idx}"))
            .collect();
        assert_eq!(report.accepted, expected);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn unlimited_cap_accepts_every_survivor_once() {
        let tree = tree();
        let batch = candidates(4);

        let report = run(&batch, &[true, false, true, true], None, &tree, 3).unwrap();
        assert_eq!(report.accepted, vec!["s0", "s2", "s3"]);

        let record = tree.get("s2").unwrap();
        assert_eq!(record.iteration, 3);
        assert_eq!(record.parent.as_deref(), Some("p"));
        let p = tree.get("p").unwrap();
        assert!(p.children.contains("s2") && p.historic_children.contains("s2"));
    }

    #[test]
    fn existing_keys_are_never_reinserted() {
        let tree = tree();
        let batch = candidates(2);
        run(&batch, &[true, true], None, &tree, 1).unwrap();

        let mut again = candidates(2);
        again[0].score = 42.0;
        let report = run(&again, &[true, true], None, &tree, 2).unwrap();

        assert!(report.accepted.is_empty());
        assert_eq!(tree.get("s0").unwrap().score, 0.0);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn missing_parent_is_reported() {
        let tree = tree();
        let batch = vec![CandidateRecord::derived("orphan", "ghost")];

        let err = run(&batch, &[true], None, &tree, 1).unwrap_err();
        assert!(matches!(err, TreeError::MissingParent { .. }));
    }
}
