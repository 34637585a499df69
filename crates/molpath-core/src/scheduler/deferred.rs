use crate::engine::config::SearchParams;
use crate::engine::context::SearchContext;
use crate::engine::snapshot::IterationSnapshot;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// A client change that could not be applied because the job was mid-iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredAction {
    SetParams(SearchParams),
    SetOperators(Vec<String>),
    Prune(Vec<String>),
}

impl DeferredAction {
    /// Applies a parameter or operator change to `snapshot`. Prune requests are handed back.
    pub(crate) fn fold_into(self, snapshot: &mut IterationSnapshot) -> Option<Self> {
        match self {
            Self::SetParams(params) => {
                snapshot.params = params;
                None
            }
            Self::SetOperators(operators) => {
                snapshot.operators = operators;
                None
            }
            prune @ Self::Prune(_) => Some(prune),
        }
    }
}

/// Ordered buffer of deferred actions for one job.
#[derive(Debug, Default)]
pub(crate) struct DeferredQueue {
    actions: VecDeque<DeferredAction>,
}

impl DeferredQueue {
    pub(crate) fn push(&mut self, action: DeferredAction) {
        self.actions.push_back(action);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn drain(&mut self) -> DeferredBatch {
        DeferredBatch {
            actions: self.actions.drain(..).collect(),
        }
    }

    /// Puts actions back ahead of everything queued since they were drained.
    pub(crate) fn requeue_front(&mut self, actions: Vec<DeferredAction>) {
        for action in actions.into_iter().rev() {
            self.actions.push_front(action);
        }
    }

    /// Folds parameter and operator changes into a committed snapshot. Prune requests stay
    /// queued since they only mean something at the start of an iteration.
    pub(crate) fn fold_into(&mut self, snapshot: &mut IterationSnapshot) {
        let kept: VecDeque<DeferredAction> = self
            .actions
            .drain(..)
            .filter_map(|action| action.fold_into(snapshot))
            .collect();
        self.actions = kept;
    }
}

/// Actions drained at the start of an iteration.
#[derive(Debug, Default)]
pub struct DeferredBatch {
    actions: Vec<DeferredAction>,
}

impl DeferredBatch {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn actions(&self) -> &[DeferredAction] {
        &self.actions
    }

    /// Applies the actions in submission order and returns the keys to prune this iteration.
    pub fn apply_to(self, ctx: &mut SearchContext) -> HashSet<String> {
        let mut prunes = HashSet::new();
        for action in self.actions {
            match action {
                DeferredAction::SetParams(params) => {
                    debug!(job_id = %ctx.job_id, "Applying deferred parameter change");
                    ctx.params = params;
                }
                DeferredAction::SetOperators(operators) => {
                    debug!(job_id = %ctx.job_id, count = operators.len(), "Applying deferred operator change");
                    ctx.operators = operators;
                }
                DeferredAction::Prune(keys) => prunes.extend(keys),
            }
        }
        prunes
    }
}
