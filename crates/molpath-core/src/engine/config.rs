use crate::core::models::candidate::ScoreDirection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Parameter block of one search job.
///
/// Every field has a default, so partially specified blocks (e.g. from a job file) can be
/// deserialized directly. Use [`SearchParams::validate`] before handing a block to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Lower scores are better when `true`; higher scores are better otherwise.
    pub score_is_distance: bool,
    /// Maximum number of candidates accepted per iteration; `-1` means unlimited.
    pub keep_candidates: i64,
    pub keep_candidates_max: i64,
    /// Attempt budget for leaves far from the goal.
    pub exploration_budget: u32,
    /// Attempt budget for leaves near the goal.
    pub exploitation_budget: u32,
    /// Score at which the attempt budget switches from exploration to exploitation.
    pub depth_switch: f64,
    /// Derivation count above which a stale candidate is actually pruned.
    pub max_derivations: u32,
    /// Iterations without improvement after which a candidate becomes a prune candidate.
    pub stale_threshold: u32,
    /// When `true`, a stale candidate that is kept loses its descendants and becomes a leaf
    /// again; otherwise only the counters of its subtree are reset.
    pub erase_stale_descendants: bool,
    pub max_iterations: u32,
    pub max_seconds: u64,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Number of Pareto rounds; `0` disables the Pareto filter.
    pub pareto_rounds: u32,
    pub score_script: Option<String>,
    pub filter_script: Option<String>,
    pub descriptor_script: Option<String>,
    /// The search is complete once a candidate with this key is accepted.
    pub goal_key: Option<String>,
    /// Consecutive failed iterations tolerated before the job is put to sleep.
    pub max_stage_failures: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            score_is_distance: true,
            keep_candidates: 40,
            keep_candidates_max: 150,
            exploration_budget: 200,
            exploitation_budget: 90,
            depth_switch: 0.1,
            max_derivations: 5000,
            stale_threshold: 6,
            erase_stale_descendants: false,
            max_iterations: 500,
            max_seconds: 21_600,
            min_weight: 0.0,
            max_weight: 500.0,
            pareto_rounds: 0,
            score_script: None,
            filter_script: None,
            descriptor_script: None,
            goal_key: None,
            max_stage_failures: 3,
        }
    }
}

impl SearchParams {
    pub fn direction(&self) -> ScoreDirection {
        if self.score_is_distance {
            ScoreDirection::LowerIsBetter
        } else {
            ScoreDirection::HigherIsBetter
        }
    }

    /// The per-iteration acceptance cap, or `None` when unlimited.
    pub fn acceptance_cap(&self) -> Option<usize> {
        usize::try_from(self.keep_candidates).ok()
    }

    /// Picks the attempt budget for a leaf with the given score.
    pub fn attempt_budget(&self, score: f64) -> u32 {
        let near_goal = match self.direction() {
            ScoreDirection::LowerIsBetter => score < self.depth_switch,
            ScoreDirection::HigherIsBetter => score > self.depth_switch,
        };
        if near_goal {
            self.exploitation_budget
        } else {
            self.exploration_budget
        }
    }

    pub fn pareto_enabled(&self) -> bool {
        self.pareto_rounds > 0
    }

    /// Checks the parameter block for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidParameter {
                name,
                reason: reason.into(),
            }
        }

        if self.keep_candidates_max <= 0 {
            return Err(invalid("keep_candidates_max", "must be positive"));
        }
        if self.keep_candidates != -1
            && !(1..=self.keep_candidates_max).contains(&self.keep_candidates)
        {
            return Err(invalid(
                "keep_candidates",
                format!(
                    "must be -1 or between 1 and {} (got {})",
                    self.keep_candidates_max, self.keep_candidates
                ),
            ));
        }
        if self.exploration_budget == 0 {
            return Err(invalid("exploration_budget", "must be positive"));
        }
        if self.exploitation_budget == 0 {
            return Err(invalid("exploitation_budget", "must be positive"));
        }
        if !self.depth_switch.is_finite()
            || (self.score_is_distance && !(0.0..=1.0).contains(&self.depth_switch))
        {
            return Err(invalid(
                "depth_switch",
                format!("{} is out of range", self.depth_switch),
            ));
        }
        if self.max_derivations == 0 {
            return Err(invalid("max_derivations", "must be positive"));
        }
        if self.stale_threshold == 0 {
            return Err(invalid("stale_threshold", "must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", "must be positive"));
        }
        if self.max_seconds == 0 {
            return Err(invalid("max_seconds", "must be positive"));
        }
        if !(self.min_weight >= 0.0 && self.min_weight <= self.max_weight && self.max_weight > 0.0)
        {
            return Err(invalid(
                "weight",
                format!(
                    "range [{}, {}] is not a valid weight window",
                    self.min_weight, self.max_weight
                ),
            ));
        }
        for (name, script) in [
            ("score_script", &self.score_script),
            ("filter_script", &self.filter_script),
            ("descriptor_script", &self.descriptor_script),
        ] {
            if script.as_deref().is_some_and(|cmd| cmd.trim().is_empty()) {
                return Err(invalid(name, "command must not be blank"));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SearchParamsBuilder {
    score_is_distance: Option<bool>,
    keep_candidates: Option<i64>,
    keep_candidates_max: Option<i64>,
    exploration_budget: Option<u32>,
    exploitation_budget: Option<u32>,
    depth_switch: Option<f64>,
    max_derivations: Option<u32>,
    stale_threshold: Option<u32>,
    erase_stale_descendants: Option<bool>,
    max_iterations: Option<u32>,
    max_seconds: Option<u64>,
    weight_range: Option<(f64, f64)>,
    pareto_rounds: Option<u32>,
    score_script: Option<String>,
    filter_script: Option<String>,
    descriptor_script: Option<String>,
    goal_key: Option<String>,
    max_stage_failures: Option<u32>,
}

impl SearchParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score_is_distance(mut self, flag: bool) -> Self {
        self.score_is_distance = Some(flag);
        self
    }

    pub fn keep_candidates(mut self, cap: i64) -> Self {
        self.keep_candidates = Some(cap);
        self
    }

    pub fn keep_candidates_max(mut self, max: i64) -> Self {
        self.keep_candidates_max = Some(max);
        self
    }

    pub fn exploration_budget(mut self, budget: u32) -> Self {
        self.exploration_budget = Some(budget);
        self
    }

    pub fn exploitation_budget(mut self, budget: u32) -> Self {
        self.exploitation_budget = Some(budget);
        self
    }

    pub fn depth_switch(mut self, switch: f64) -> Self {
        self.depth_switch = Some(switch);
        self
    }

    pub fn max_derivations(mut self, max: u32) -> Self {
        self.max_derivations = Some(max);
        self
    }

    pub fn stale_threshold(mut self, threshold: u32) -> Self {
        self.stale_threshold = Some(threshold);
        self
    }

    pub fn erase_stale_descendants(mut self, flag: bool) -> Self {
        self.erase_stale_descendants = Some(flag);
        self
    }

    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn max_seconds(mut self, seconds: u64) -> Self {
        self.max_seconds = Some(seconds);
        self
    }

    pub fn weight_range(mut self, min: f64, max: f64) -> Self {
        self.weight_range = Some((min, max));
        self
    }

    pub fn pareto_rounds(mut self, rounds: u32) -> Self {
        self.pareto_rounds = Some(rounds);
        self
    }

    pub fn score_script(mut self, command: impl Into<String>) -> Self {
        self.score_script = Some(command.into());
        self
    }

    pub fn filter_script(mut self, command: impl Into<String>) -> Self {
        self.filter_script = Some(command.into());
        self
    }

    pub fn descriptor_script(mut self, command: impl Into<String>) -> Self {
        self.descriptor_script = Some(command.into());
        self
    }

    pub fn goal_key(mut self, key: impl Into<String>) -> Self {
        self.goal_key = Some(key.into());
        self
    }

    pub fn max_stage_failures(mut self, failures: u32) -> Self {
        self.max_stage_failures = Some(failures);
        self
    }

    pub fn build(self) -> Result<SearchParams, ConfigError> {
        let defaults = SearchParams::default();
        let (min_weight, max_weight) = self
            .weight_range
            .unwrap_or((defaults.min_weight, defaults.max_weight));
        let params = SearchParams {
            score_is_distance: self.score_is_distance.unwrap_or(defaults.score_is_distance),
            keep_candidates: self.keep_candidates.unwrap_or(defaults.keep_candidates),
            keep_candidates_max: self
                .keep_candidates_max
                .unwrap_or(defaults.keep_candidates_max),
            exploration_budget: self
                .exploration_budget
                .unwrap_or(defaults.exploration_budget),
            exploitation_budget: self
                .exploitation_budget
                .unwrap_or(defaults.exploitation_budget),
            depth_switch: self.depth_switch.unwrap_or(defaults.depth_switch),
            max_derivations: self.max_derivations.unwrap_or(defaults.max_derivations),
            stale_threshold: self.stale_threshold.unwrap_or(defaults.stale_threshold),
            erase_stale_descendants: self
                .erase_stale_descendants
                .unwrap_or(defaults.erase_stale_descendants),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            max_seconds: self.max_seconds.unwrap_or(defaults.max_seconds),
            min_weight,
            max_weight,
            pareto_rounds: self.pareto_rounds.unwrap_or(defaults.pareto_rounds),
            score_script: self.score_script,
            filter_script: self.filter_script,
            descriptor_script: self.descriptor_script,
            goal_key: self.goal_key,
            max_stage_failures: self
                .max_stage_failures
                .unwrap_or(defaults.max_stage_failures),
        };
        params.validate()?;
        Ok(params)
    }
}
