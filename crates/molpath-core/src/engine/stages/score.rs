use super::StageContext;
use crate::core::io::script::ScriptRunner;
use crate::core::models::candidate::CandidateRecord;
use crate::engine::error::EngineError;
use crate::engine::progress::Progress;
use tracing::{debug, instrument, trace, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Scores every generated candidate.
///
/// In-process scoring failures give the candidate the sentinel worst score. When a score script
/// is configured its values replace the in-process scores; candidates missing from its output
/// also receive the sentinel. With a finite acceptance cap the batch is finally sorted best
/// first, so that the cap keeps the best survivors.
///
/// # Errors
///
/// Returns [`EngineError::Script`] if the score script cannot be run or exits unsuccessfully.
#[instrument(skip_all, name = "score_stage", fields(candidates = candidates.len()))]
pub fn run(candidates: &mut [CandidateRecord], stage: &StageContext) -> Result<(), EngineError> {
    let direction = stage.params.direction();

    stage.reporter.report(Progress::PhaseStart { name: "Score" });
    stage.reporter.report(Progress::TaskStart {
        total_steps: candidates.len() as u64,
    });

    #[cfg(not(feature = "parallel"))]
    let iterator = candidates.iter_mut();

    #[cfg(feature = "parallel")]
    let iterator = candidates.par_iter_mut();

    iterator.for_each(|candidate| {
        if stage.cancel.is_cancelled() {
            return;
        }
        candidate.score = match stage.scorer.score(candidate) {
            Ok(score) if score.is_finite() => score,
            Ok(score) => {
                trace!(key = %candidate.key, score, "Non-finite score replaced by sentinel");
                stage.failures.collaborator_failed();
                direction.worst()
            }
            Err(e) => {
                trace!(error = %e, "Scoring failed");
                stage.failures.collaborator_failed();
                direction.worst()
            }
        };
        match stage.scorer.descriptors(candidate) {
            Ok(descriptors) if !descriptors.is_empty() => candidate.descriptors = descriptors,
            Ok(_) => {}
            Err(e) => {
                trace!(error = %e, "Descriptor computation failed");
                stage.failures.collaborator_failed();
            }
        }
        stage.reporter.report(Progress::TaskIncrement);
    });
    stage.reporter.report(Progress::TaskFinish);

    if stage.cancel.is_cancelled() {
        stage.reporter.report(Progress::PhaseFinish);
        return Ok(());
    }

    if let Some(command) = &stage.params.score_script {
        if !candidates.is_empty() {
            apply_script_scores(candidates, command, stage)?;
        }
    }

    if stage.params.acceptance_cap().is_some() {
        candidates.sort_by(|a, b| direction.best_first(a.score, b.score));
    }

    stage.reporter.report(Progress::PhaseFinish);
    debug!("Candidates scored");
    Ok(())
}

fn apply_script_scores(
    candidates: &mut [CandidateRecord],
    command: &str,
    stage: &StageContext,
) -> Result<(), EngineError> {
    let records = ScriptRunner::new(command)
        .exchange(
            &stage.script_dir("similarity"),
            candidates.iter().map(|c| c.key.as_str()),
        )
        .map_err(|source| EngineError::Script {
            stage: "score",
            source,
        })?;

    let worst = stage.params.direction().worst();
    let mut missing = 0usize;
    for candidate in candidates.iter_mut() {
        match records.get(&candidate.key).and_then(|values| values.first()) {
            Some(score) => candidate.score = *score,
            None => {
                candidate.score = worst;
                stage.failures.record_missing();
                missing += 1;
            }
        }
    }
    if missing > 0 {
        warn!(
            missing,
            command, "Score script omitted candidates; sentinel score assigned"
        );
    }
    Ok(())
}
