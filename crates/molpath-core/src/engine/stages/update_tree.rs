use crate::core::models::candidate::ScoreDirection;
use crate::core::tree::{CandidateTree, TreeError};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Propagates improvements found in this iteration up the tree.
///
/// For every modified parent the best score among its current children is compared against
/// each ancestor on the way to the root, starting with the parent itself. An ancestor whose own
/// score is strictly worse has its improvement counter reset. The walk stops before the root
/// (roots never age) or at `anchor`.
///
/// Returns the number of counter resets.
#[instrument(skip_all, name = "update_tree_stage", fields(parents = modified_parents.len()))]
pub fn run(
    tree: &CandidateTree,
    modified_parents: &BTreeSet<String>,
    direction: ScoreDirection,
    anchor: Option<&str>,
) -> Result<usize, TreeError> {
    let parents: Vec<&String> = modified_parents.iter().collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = parents.iter();

    #[cfg(feature = "parallel")]
    let iterator = parents.par_iter();

    let resets = iterator
        .map(|parent| propagate(tree, parent, direction, anchor))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .sum();
    debug!(resets, "Improvement counters updated");
    Ok(resets)
}

fn propagate(
    tree: &CandidateTree,
    parent: &str,
    direction: ScoreDirection,
    anchor: Option<&str>,
) -> Result<usize, TreeError> {
    let children: Vec<String> = tree
        .find(parent)
        .ok_or_else(|| TreeError::MissingRecord(parent.to_string()))?
        .children
        .iter()
        .cloned()
        .collect();

    let mut best: Option<f64> = None;
    for child in &children {
        let score = tree
            .find(child)
            .ok_or_else(|| TreeError::MissingRecord(child.clone()))?
            .score;
        if best.is_none_or(|current| direction.is_better(score, current)) {
            best = Some(score);
        }
    }
    let Some(best) = best else {
        return Ok(0);
    };

    let mut resets = 0;
    let mut current = parent.to_string();
    loop {
        if anchor == Some(current.as_str()) {
            break;
        }
        let mut record = tree
            .find(&current)
            .ok_or_else(|| TreeError::MissingRecord(current.clone()))?;
        let Some(next) = record.parent.clone() else {
            break;
        };
        if direction.is_better(best, record.score) {
            record.iters_without_improvement = 0;
            resets += 1;
        }
        drop(record);
        current = next;
    }
    Ok(resets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::candidate::CandidateRecord;

    /// r(1.0) -> a(0.8) -> b(0.6) -> {c(0.7), d(0.5)}
    fn tree() -> CandidateTree {
        let tree = CandidateTree::from_roots([CandidateRecord::root("r", 1.0)]).unwrap();
        for (key, parent, score) in [
            ("a", "r", 0.8),
            ("b", "a", 0.6),
            ("c", "b", 0.7),
            ("d", "b", 0.5),
        ] {
            tree.insert_if_absent(CandidateRecord::derived(key, parent).with_score(score));
            tree.attach_child(parent, key).unwrap();
        }
        tree.scan(|record| {
            record.iters_without_improvement = 5;
            None::<()>
        });
        tree
    }

    fn counter(tree: &CandidateTree, key: &str) -> u32 {
        tree.get(key).unwrap().iters_without_improvement
    }

    #[test]
    fn strictly_better_child_resets_the_ancestor_chain() {
        let tree = tree();
        let parents = BTreeSet::from(["b".to_string()]);

        let resets = run(&tree, &parents, ScoreDirection::LowerIsBetter, None).unwrap();

        assert_eq!(resets, 2);
        assert_eq!(counter(&tree, "b"), 0);
        assert_eq!(counter(&tree, "a"), 0);
        assert_eq!(counter(&tree, "r"), 5);
        assert_eq!(counter(&tree, "d"), 5);
    }

    #[test]
    fn ancestors_that_are_already_better_keep_aging() {
        let tree = tree();
        let parents = BTreeSet::from(["b".to_string()]);

        let resets = run(&tree, &parents, ScoreDirection::HigherIsBetter, None).unwrap();

        assert_eq!(resets, 1);
        assert_eq!(counter(&tree, "b"), 0);
        assert_eq!(counter(&tree, "a"), 5);
    }

    #[test]
    fn walk_stops_at_the_anchor() {
        let tree = tree();
        let parents = BTreeSet::from(["b".to_string()]);

        let resets = run(&tree, &parents, ScoreDirection::LowerIsBetter, Some("a")).unwrap();

        assert_eq!(resets, 1);
        assert_eq!(counter(&tree, "a"), 5);
    }

    #[test]
    fn missing_parent_is_an_invariant_violation() {
        let tree = tree();
        let parents = BTreeSet::from(["ghost".to_string()]);
        assert_eq!(
            run(&tree, &parents, ScoreDirection::LowerIsBetter, None),
            Err(TreeError::MissingRecord("ghost".to_string()))
        );
    }
}
