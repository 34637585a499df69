use crate::core::models::candidate::CandidateRecord;
use crate::core::tree::CandidateTree;
use tracing::{debug, instrument};

/// Collects a snapshot of every leaf, ordered by key.
///
/// As a side effect every non-root record ages by one iteration without improvement; the
/// counter is reset later by [`update_tree`](super::update_tree) when a descendant improves.
#[instrument(skip_all, name = "find_leaves_stage")]
pub fn run(tree: &CandidateTree) -> Vec<CandidateRecord> {
    let mut leaves = tree.scan(|record| {
        if !record.is_root() {
            record.iters_without_improvement += 1;
        }
        record.is_leaf().then(|| record.clone())
    });
    leaves.sort_by(|a, b| a.key.cmp(&b.key));
    debug!(leaves = leaves.len(), records = tree.len(), "Leaves collected");
    leaves
}
