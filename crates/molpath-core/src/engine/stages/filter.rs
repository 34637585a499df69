use super::StageContext;
use crate::core::io::script::ScriptRunner;
use crate::core::models::candidate::CandidateRecord;
use crate::core::tree::{CandidateTree, TreeError};
use crate::engine::error::EngineError;
use tracing::{debug, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Evaluates the AND-chain of survival predicates and returns one flag per candidate.
///
/// In-process predicates run first: weight window, global uniqueness (key and alias), and
/// "not already derived by this parent". Survivors are then passed through the optional filter
/// script and, if configured, receive their descriptor vectors from the descriptor script.
/// A candidate missing from either script's output does not survive.
#[instrument(skip_all, name = "filter_stage", fields(candidates = candidates.len()))]
pub fn run(
    candidates: &mut [CandidateRecord],
    tree: &CandidateTree,
    stage: &StageContext,
) -> Result<Vec<bool>, EngineError> {
    let params = stage.params;

    #[cfg(not(feature = "parallel"))]
    let iterator = candidates.iter();

    #[cfg(feature = "parallel")]
    let iterator = candidates.par_iter();

    let mut survivors = iterator
        .map(|candidate| -> Result<bool, TreeError> {
            let in_window =
                candidate.weight >= params.min_weight && candidate.weight <= params.max_weight;
            if !in_window || tree.contains(&candidate.key) {
                return Ok(false);
            }
            if candidate
                .alias
                .as_deref()
                .is_some_and(|alias| tree.contains_alias(alias))
            {
                return Ok(false);
            }
            let Some(parent) = candidate.parent.as_deref() else {
                return Ok(false);
            };
            let parent_record = tree.find(parent).ok_or_else(|| TreeError::MissingParent {
                child: candidate.key.clone(),
                parent: parent.to_string(),
            })?;
            Ok(!parent_record.historic_children.contains(&candidate.key))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(command) = &params.filter_script {
        apply_filter_script(candidates, &mut survivors, command, stage)?;
    }
    if let Some(command) = &params.descriptor_script {
        apply_descriptor_script(candidates, &mut survivors, command, stage)?;
    }

    debug!(
        survivors = survivors.iter().filter(|alive| **alive).count(),
        "Candidates filtered"
    );
    Ok(survivors)
}

fn surviving_keys<'c>(
    candidates: &'c [CandidateRecord],
    survivors: &'c [bool],
) -> impl Iterator<Item = &'c str> {
    candidates
        .iter()
        .zip(survivors)
        .filter(|(_, alive)| **alive)
        .map(|(candidate, _)| candidate.key.as_str())
}

fn apply_filter_script(
    candidates: &[CandidateRecord],
    survivors: &mut [bool],
    command: &str,
    stage: &StageContext,
) -> Result<(), EngineError> {
    if !survivors.iter().any(|alive| *alive) {
        return Ok(());
    }
    let records = ScriptRunner::new(command)
        .exchange(&stage.script_dir("filter"), surviving_keys(candidates, survivors))
        .map_err(|source| EngineError::Script {
            stage: "filter",
            source,
        })?;

    let mut missing = 0usize;
    for (candidate, alive) in candidates.iter().zip(survivors.iter_mut()) {
        if !*alive {
            continue;
        }
        match records.get(&candidate.key).and_then(|values| values.first()) {
            Some(verdict) => *alive = *verdict == 1.0,
            None => {
                *alive = false;
                stage.failures.record_missing();
                missing += 1;
            }
        }
    }
    if missing > 0 {
        warn!(missing, command, "Filter script omitted candidates; they were rejected");
    }
    Ok(())
}

fn apply_descriptor_script(
    candidates: &mut [CandidateRecord],
    survivors: &mut [bool],
    command: &str,
    stage: &StageContext,
) -> Result<(), EngineError> {
    if !survivors.iter().any(|alive| *alive) {
        return Ok(());
    }
    let mut records = ScriptRunner::new(command)
        .exchange(
            &stage.script_dir("descriptors"),
            surviving_keys(candidates, survivors),
        )
        .map_err(|source| EngineError::Script {
            stage: "descriptors",
            source,
        })?;

    let mut missing = 0usize;
    for (candidate, alive) in candidates.iter_mut().zip(survivors.iter_mut()) {
        if !*alive {
            continue;
        }
        match records.remove(&candidate.key) {
            Some(descriptors) => candidate.descriptors = descriptors,
            None => {
                *alive = false;
                stage.failures.record_missing();
                missing += 1;
            }
        }
    }
    if missing > 0 {
        warn!(missing, command, "Descriptor script omitted candidates; they were rejected");
    }
    Ok(())
}
