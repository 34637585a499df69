use crate::core::models::candidate::CandidateRecord;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Returns `true` if descriptor vector `b` dominates `a`.
///
/// Components are minimized: `b` dominates `a` when it is no worse on every component and
/// strictly better on at least one.
pub fn dominates(b: &[f64], a: &[f64]) -> bool {
    let mut strictly_better = false;
    for (x, y) in b.iter().zip(a) {
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Flags the members of `active` that no other active candidate dominates.
fn non_dominated(candidates: &[CandidateRecord], active: &[bool]) -> Vec<bool> {
    #[cfg(not(feature = "parallel"))]
    let iterator = candidates.iter().enumerate();

    #[cfg(feature = "parallel")]
    let iterator = candidates.par_iter().enumerate();

    iterator
        .map(|(idx, candidate)| {
            active[idx]
                && !candidates.iter().enumerate().any(|(other_idx, other)| {
                    other_idx != idx
                        && active[other_idx]
                        && dominates(&other.descriptors, &candidate.descriptors)
                })
        })
        .collect()
}

/// Iterative non-domination filter over the current survivors.
///
/// Each round marks the non-dominated subset of the active candidates as accepted and removes
/// it from the active set. Rounds stop at `rounds` or when nothing is active. Survivors become
/// the union of all accepted subsets, which is always a subset of the incoming survivors.
///
/// Returns the number of rounds executed.
#[instrument(skip_all, name = "pareto_stage", fields(rounds = rounds))]
pub fn run(candidates: &[CandidateRecord], survivors: &mut [bool], rounds: u32) -> u32 {
    let mut active = survivors.to_vec();
    let mut accepted = vec![false; survivors.len()];
    let mut executed = 0;

    while executed < rounds && active.iter().any(|flag| *flag) {
        let optimal = non_dominated(candidates, &active);
        for ((is_active, is_accepted), optimal) in
            active.iter_mut().zip(accepted.iter_mut()).zip(&optimal)
        {
            *is_active = *is_active && !*optimal;
            *is_accepted = *is_accepted || *optimal;
        }
        executed += 1;
    }

    for (survivor, accepted) in survivors.iter_mut().zip(&accepted) {
        *survivor = *survivor && *accepted;
    }
    debug!(
        executed,
        survivors = survivors.iter().filter(|alive| **alive).count(),
        "Pareto filter applied"
    );
    executed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_descriptors(vectors: &[&[f64]]) -> Vec<CandidateRecord> {
        vectors
            .iter()
            .enumerate()
            .map(|(idx, vector)| {
                CandidateRecord::derived(format!("c{idx}"), "root").with_descriptors(vector.to_vec())
            })
            .collect()
    }

    #[test]
    fn domination_requires_a_strict_improvement() {
        assert!(dominates(&[1.0, 1.0], &[2.0, 2.0]));
        assert!(dominates(&[1.0, 1.0], &[1.0, 2.0]));
        assert!(!dominates(&[1.0, 2.0], &[1.0, 2.0]));
        assert!(!dominates(&[1.0, 2.0], &[2.0, 1.0]));
        assert!(!dominates(&[2.0, 2.0], &[1.0, 1.0]));
    }

    #[test]
    fn single_round_keeps_only_the_front() {
        let candidates = with_descriptors(&[&[1.0, 1.0], &[2.0, 2.0], &[1.0, 2.0]]);
        let mut survivors = vec![true; 3];

        assert_eq!(run(&candidates, &mut survivors, 1), 1);
        assert_eq!(survivors, vec![true, false, false]);
    }

    #[test]
    fn later_rounds_admit_the_next_front() {
        let candidates = with_descriptors(&[&[1.0, 1.0], &[2.0, 2.0], &[1.0, 2.0]]);
        let mut survivors = vec![true; 3];

        assert_eq!(run(&candidates, &mut survivors, 2), 2);
        assert_eq!(survivors, vec![true, false, true]);
    }

    #[test]
    fn incomparable_vectors_are_both_non_dominated() {
        let candidates = with_descriptors(&[&[1.0, 2.0], &[2.0, 1.0], &[3.0, 3.0]]);
        let mut survivors = vec![true; 3];

        run(&candidates, &mut survivors, 1);
        assert_eq!(survivors, vec![true, true, false]);
    }

    #[test]
    fn filtered_candidates_neither_pass_nor_dominate() {
        let candidates = with_descriptors(&[&[0.0, 0.0], &[2.0, 2.0], &[3.0, 3.0]]);
        let mut survivors = vec![false, true, true];

        run(&candidates, &mut survivors, 1);
        assert_eq!(survivors, vec![false, true, false]);
    }

    #[test]
    fn rounds_stop_when_nothing_is_active() {
        let candidates = with_descriptors(&[&[1.0], &[2.0]]);
        let mut survivors = vec![true, true];

        assert_eq!(run(&candidates, &mut survivors, 10), 2);
        assert_eq!(survivors, vec![true, true]);
    }
}
