use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Direction in which candidate scores improve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreDirection {
    /// Scores are distances to the goal; smaller is better.
    LowerIsBetter,
    /// Scores are similarities to the goal; larger is better.
    HigherIsBetter,
}

impl ScoreDirection {
    /// Returns `true` if `a` is strictly better than `b`.
    #[inline]
    pub fn is_better(self, a: f64, b: f64) -> bool {
        match self {
            Self::LowerIsBetter => a < b,
            Self::HigherIsBetter => a > b,
        }
    }

    /// The sentinel assigned to candidates whose score could not be obtained.
    ///
    /// Finite so that it survives JSON snapshots.
    #[inline]
    pub fn worst(self) -> f64 {
        match self {
            Self::LowerIsBetter => f64::MAX,
            Self::HigherIsBetter => f64::MIN,
        }
    }

    /// Orders two scores so that the better one comes first.
    pub fn best_first(self, a: f64, b: f64) -> Ordering {
        match self {
            Self::LowerIsBetter => a.total_cmp(&b),
            Self::HigherIsBetter => b.total_cmp(&a),
        }
    }
}

/// One explored (or freshly generated) candidate structure.
///
/// The same type is used for candidates produced by a [`CandidateGenerator`](crate::core::traits::CandidateGenerator)
/// and for records stored in the [`CandidateTree`](crate::core::tree::CandidateTree). Tree records
/// own their `children` and `historic_children` sets; generated candidates leave them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Canonical identity string. Never changes once the record exists.
    pub key: String,
    /// Key of the record this candidate was derived from; `None` for roots.
    pub parent: Option<String>,
    /// Currently accepted children. Prunable.
    #[serde(default)]
    pub children: BTreeSet<String>,
    /// Every child ever accepted under this record. Append-only.
    #[serde(default)]
    pub historic_children: BTreeSet<String>,
    pub score: f64,
    #[serde(default)]
    pub descriptors: Vec<f64>,
    #[serde(default)]
    pub iters_without_improvement: u32,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub feasibility: Option<f64>,
    /// Coarser identity (e.g. a scaffold) indexed alongside the key.
    #[serde(default)]
    pub alias: Option<String>,
    /// Name of the operator that produced this candidate.
    #[serde(default)]
    pub operator: Option<String>,
    /// Iteration in which the record was accepted into the tree.
    #[serde(default)]
    pub iteration: u32,
}

impl CandidateRecord {
    pub fn root(key: impl Into<String>, score: f64) -> Self {
        Self {
            key: key.into(),
            parent: None,
            children: BTreeSet::new(),
            historic_children: BTreeSet::new(),
            score,
            descriptors: Vec::new(),
            iters_without_improvement: 0,
            weight: 0.0,
            feasibility: None,
            alias: None,
            operator: None,
            iteration: 0,
        }
    }

    pub fn derived(key: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::root(key, 0.0)
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_descriptors(mut self, descriptors: Vec<f64>) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Strips tree ownership so a generated candidate can be inserted as a fresh record.
    pub(crate) fn into_fresh_record(mut self, iteration: u32) -> Self {
        self.children.clear();
        self.historic_children.clear();
        self.iters_without_improvement = 0;
        self.iteration = iteration;
        self
    }
}
