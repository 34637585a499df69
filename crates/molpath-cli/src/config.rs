use crate::error::{CliError, Result};
use molpath::engine::config::SearchParams;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Search parameters as written in a job file. Unset fields keep the value they are laid over.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialSearchConfig {
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
    min_weight: Option<f64>,
    max_weight: Option<f64>,
    pareto_rounds: Option<u32>,
    score_script: Option<String>,
    filter_script: Option<String>,
    descriptor_script: Option<String>,
    goal_key: Option<String>,
    max_stage_failures: Option<u32>,
}

/// One job file.
///
/// ```toml
/// password = "secret"
/// roots = ["hello"]
/// operators = ["insert", "delete", "substitute", "swap"]
///
/// [search]
/// keep-candidates = 10
/// max-iterations = 50
/// ```
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct JobFile {
    password: Option<String>,
    roots: Option<Vec<String>>,
    operators: Option<Vec<String>>,
    anchor: Option<String>,
    search: Option<PartialSearchConfig>,
}

/// A fully resolved job file.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
    pub password: String,
    pub roots: Vec<String>,
    pub operators: Vec<String>,
    pub anchor: Option<String>,
    pub params: SearchParams,
}

impl JobFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading job file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Resolves the file against defaults and `--set` overrides.
    ///
    /// `default_operators` is used when the file names none.
    pub fn resolve(self, set_values: &[String], default_operators: &[&str]) -> Result<JobDefinition> {
        let roots = self
            .roots
            .filter(|roots| !roots.is_empty())
            .ok_or_else(|| CliError::Config("`roots` must list at least one key.".to_string()))?;
        let operators = self.operators.unwrap_or_else(|| {
            default_operators
                .iter()
                .map(|operator| operator.to_string())
                .collect()
        });
        if operators.is_empty() {
            return Err(CliError::Config(
                "`operators` must list at least one operator.".to_string(),
            ));
        }

        let mut search = self.search.unwrap_or_default();
        search.apply_set_values(set_values)?;
        let params = search.overlay(SearchParams::default())?;

        Ok(JobDefinition {
            password: self.password.unwrap_or_default(),
            roots,
            operators,
            anchor: self.anchor,
            params,
        })
    }
}

impl PartialSearchConfig {
    /// Writes every set field over `base` and validates the result.
    pub fn overlay(self, mut base: SearchParams) -> Result<SearchParams> {
        if let Some(v) = self.score_is_distance {
            base.score_is_distance = v;
        }
        if let Some(v) = self.keep_candidates {
            base.keep_candidates = v;
        }
        if let Some(v) = self.keep_candidates_max {
            base.keep_candidates_max = v;
        }
        if let Some(v) = self.exploration_budget {
            base.exploration_budget = v;
        }
        if let Some(v) = self.exploitation_budget {
            base.exploitation_budget = v;
        }
        if let Some(v) = self.depth_switch {
            base.depth_switch = v;
        }
        if let Some(v) = self.max_derivations {
            base.max_derivations = v;
        }
        if let Some(v) = self.stale_threshold {
            base.stale_threshold = v;
        }
        if let Some(v) = self.erase_stale_descendants {
            base.erase_stale_descendants = v;
        }
        if let Some(v) = self.max_iterations {
            base.max_iterations = v;
        }
        if let Some(v) = self.max_seconds {
            base.max_seconds = v;
        }
        if let Some(v) = self.min_weight {
            base.min_weight = v;
        }
        if let Some(v) = self.max_weight {
            base.max_weight = v;
        }
        if let Some(v) = self.pareto_rounds {
            base.pareto_rounds = v;
        }
        if let Some(v) = self.max_stage_failures {
            base.max_stage_failures = v;
        }
        // An empty string clears an optional command or key.
        if let Some(v) = self.score_script {
            base.score_script = non_empty(v);
        }
        if let Some(v) = self.filter_script {
            base.filter_script = non_empty(v);
        }
        if let Some(v) = self.descriptor_script {
            base.descriptor_script = non_empty(v);
        }
        if let Some(v) = self.goal_key {
            base.goal_key = non_empty(v);
        }

        base.validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(base)
    }

    pub fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "score-is-distance" => self.score_is_distance = Some(parse(key, value)?),
                "keep-candidates" => self.keep_candidates = Some(parse(key, value)?),
                "keep-candidates-max" => self.keep_candidates_max = Some(parse(key, value)?),
                "exploration-budget" => self.exploration_budget = Some(parse(key, value)?),
                "exploitation-budget" => self.exploitation_budget = Some(parse(key, value)?),
                "depth-switch" => self.depth_switch = Some(parse(key, value)?),
                "max-derivations" => self.max_derivations = Some(parse(key, value)?),
                "stale-threshold" => self.stale_threshold = Some(parse(key, value)?),
                "erase-stale-descendants" => {
                    self.erase_stale_descendants = Some(parse(key, value)?)
                }
                "max-iterations" => self.max_iterations = Some(parse(key, value)?),
                "max-seconds" => self.max_seconds = Some(parse(key, value)?),
                "min-weight" => self.min_weight = Some(parse(key, value)?),
                "max-weight" => self.max_weight = Some(parse(key, value)?),
                "pareto-rounds" => self.pareto_rounds = Some(parse(key, value)?),
                "max-stage-failures" => self.max_stage_failures = Some(parse(key, value)?),
                "score-script" => self.score_script = Some(value.to_string()),
                "filter-script" => self.filter_script = Some(value.to_string()),
                "descriptor-script" => self.descriptor_script = Some(value.to_string()),
                "goal-key" => self.goal_key = Some(value.to_string()),
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CliError::Config(format!(
            "Invalid {} value for {}: {}",
            std::any::type_name::<T>(),
            key,
            value
        ))
    })
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
