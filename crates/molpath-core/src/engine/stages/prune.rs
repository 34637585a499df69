use crate::core::tree::CandidateTree;
use crate::engine::config::SearchParams;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, instrument, trace};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Keys whose subtrees were erased.
    pub pruned: Vec<String>,
    /// Total number of erased records, descendants included.
    pub erased: usize,
    /// Stale candidates kept alive whose subtree counters were reset.
    pub refreshed: usize,
}

struct WorkItem {
    key: String,
    /// Set below a stale-but-kept ancestor: counters are reset instead of checked.
    refresh: bool,
}

/// Thresholds that decide which branches a prune pass removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunePolicy {
    pub stale_threshold: u32,
    pub max_derivations: u32,
    /// Erase the descendants of a stale node that is kept instead of refreshing them.
    pub erase_stale_descendants: bool,
}

impl From<&SearchParams> for PrunePolicy {
    fn from(params: &SearchParams) -> Self {
        Self {
            stale_threshold: params.stale_threshold,
            max_derivations: params.max_derivations,
            erase_stale_descendants: params.erase_stale_descendants,
        }
    }
}

enum Visit {
    Erase,
    Descend { children: Vec<String>, refresh: bool },
    /// Kept, but its children's subtrees are erased.
    Trim { children: Vec<String> },
}

/// Walks the forest from every root and erases stale or externally rejected branches.
///
/// A node is a prune candidate if it is in `deferred` or has aged past the stale threshold.
/// It is actually pruned (detached and erased with its subtree) if it is deferred or has
/// spawned more than `max_derivations` attempts. A stale node that is not pruned gets its
/// counter reset. By default every node below it is reset as well, with deferral still
/// honored; with `erase_stale_descendants` its descendants are erased instead, turning it back
/// into a leaf. Roots are never pruned.
///
/// The traversal is driven by an explicit work-list because the forest shrinks while it is
/// being walked; keys erased earlier in the pass are skipped.
#[instrument(skip_all, name = "prune_stage", fields(deferred = deferred.len()))]
pub fn run(
    tree: &mut CandidateTree,
    deferred: &HashSet<String>,
    policy: &PrunePolicy,
) -> PruneReport {
    let mut report = PruneReport::default();
    let mut work: VecDeque<WorkItem> = tree
        .roots()
        .iter()
        .map(|root| WorkItem {
            key: root.clone(),
            refresh: false,
        })
        .collect();

    while let Some(item) = work.pop_front() {
        let is_deferred = deferred.contains(&item.key);
        let derivations = tree.derivations(&item.key);

        let visit = {
            let Some(mut record) = tree.find(&item.key) else {
                trace!(key = %item.key, "Already erased; skipped");
                continue;
            };
            let children: Vec<String> = record.children.iter().cloned().collect();
            if record.is_root() {
                Visit::Descend {
                    children,
                    refresh: false,
                }
            } else if is_deferred {
                Visit::Erase
            } else if item.refresh {
                record.iters_without_improvement = 0;
                Visit::Descend {
                    children,
                    refresh: true,
                }
            } else if record.iters_without_improvement > policy.stale_threshold {
                if derivations > policy.max_derivations {
                    Visit::Erase
                } else {
                    record.iters_without_improvement = 0;
                    report.refreshed += 1;
                    if policy.erase_stale_descendants {
                        Visit::Trim { children }
                    } else {
                        Visit::Descend {
                            children,
                            refresh: true,
                        }
                    }
                }
            } else {
                Visit::Descend {
                    children,
                    refresh: false,
                }
            }
        };

        match visit {
            Visit::Erase => {
                report.erased += tree.erase_subtree(&item.key);
                report.pruned.push(item.key);
            }
            Visit::Trim { children } => {
                for child in children {
                    report.erased += tree.erase_subtree(&child);
                    report.pruned.push(child);
                }
            }
            Visit::Descend { children, refresh } => {
                work.extend(children.into_iter().map(|key| WorkItem { key, refresh }));
            }
        }
    }

    debug!(
        pruned = report.pruned.len(),
        erased = report.erased,
        refreshed = report.refreshed,
        "Tree pruned"
    );
    report
}
