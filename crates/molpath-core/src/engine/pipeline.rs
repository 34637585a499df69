use super::cancel::CancellationToken;
use super::context::{SearchContext, StopReason};
use super::error::EngineError;
use super::progress::{Progress, ProgressReporter};
use super::stages::prune::PrunePolicy;
use super::stages::{
    FailureCounters, StageContext, accept, filter, find_leaves, generate, pareto, prune, score,
    update_tree,
};
use crate::core::traits::{CandidateGenerator, Scorer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Summary of one executed (or cancelled) iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationReport {
    pub iteration: u32,
    pub leaves: usize,
    pub generated: usize,
    pub survivors: usize,
    pub accepted: Vec<String>,
    /// Roots of erased subtrees.
    pub pruned: Vec<String>,
    pub erased: usize,
    pub collaborator_failures: usize,
    pub missing_records: usize,
    pub stop: Option<StopReason>,
}

impl IterationReport {
    pub fn can_continue(&self) -> bool {
        self.stop.is_none()
    }

    fn cancelled(mut self) -> Self {
        self.stop = Some(StopReason::Cancelled);
        self
    }
}

/// Executes the ordered stage sequence of one iteration against a [`SearchContext`].
///
/// The pipeline itself is stateless between iterations; all persistent state lives in the
/// context. Collaborators are shared, so one pipeline can serve every job of a scheduler.
pub struct IterationPipeline {
    generator: Arc<dyn CandidateGenerator>,
    scorer: Arc<dyn Scorer>,
    scratch_dir: PathBuf,
}

impl IterationPipeline {
    pub fn new(generator: Arc<dyn CandidateGenerator>, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            generator,
            scorer,
            scratch_dir: std::env::temp_dir().join("molpath"),
        }
    }

    /// Sets the directory under which script exchanges create their working directories.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Runs one iteration.
    ///
    /// Cancellation is observed between stages and per work item inside generation and scoring.
    /// A cancelled iteration returns a report with [`StopReason::Cancelled`]; the context is then
    /// partially updated and must be discarded by the caller.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The job's search state. Updated in place.
    /// * `deferred_prunes` - Keys whose subtrees must be pruned this iteration.
    /// * `cancel` - Cooperative cancellation flag.
    /// * `reporter` - Receives phase and task progress.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] before any stage runs if the context carries invalid
    /// parameters or no operators. Returns [`EngineError::Script`] when an external script fails
    /// and [`EngineError::Tree`] when the tree turns out to be corrupted; in both cases the
    /// context must be discarded.
    #[instrument(skip_all, name = "search_iteration", fields(job_id = %ctx.job_id, iteration = ctx.iteration + 1))]
    pub fn run_iteration(
        &self,
        ctx: &mut SearchContext,
        deferred_prunes: &HashSet<String>,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<IterationReport, EngineError> {
        ctx.validate()?;
        let started = Instant::now();
        let iteration = ctx.iteration + 1;
        let failures = FailureCounters::default();
        let mut report = IterationReport {
            iteration,
            ..IterationReport::default()
        };
        ctx.tree.begin_iteration();

        let stage = StageContext {
            job_id: ctx.job_id,
            iteration,
            params: &ctx.params,
            operators: &ctx.operators,
            generator: self.generator.as_ref(),
            scorer: self.scorer.as_ref(),
            cancel,
            reporter,
            failures: &failures,
            scratch_dir: &self.scratch_dir,
        };

        if cancel.is_cancelled() {
            return Ok(report.cancelled());
        }

        // === Stage 1: Find leaves ===
        let leaves = find_leaves::run(&ctx.tree);
        report.leaves = leaves.len();

        // === Stage 2: Generate neighbors ===
        let batch = generate::run(&leaves, &stage);
        for (key, attempts) in &batch.attempts {
            ctx.tree.add_derivations(key, *attempts);
        }
        let mut candidates = batch.candidates;
        report.generated = candidates.len();
        if cancel.is_cancelled() {
            return Ok(report.cancelled());
        }

        // === Stage 3: Score ===
        score::run(&mut candidates, &stage)?;
        if cancel.is_cancelled() {
            return Ok(report.cancelled());
        }

        // === Stage 4: Filter ===
        let mut survivors = filter::run(&mut candidates, &ctx.tree, &stage)?;

        // === Stage 5: Pareto filter (optional) ===
        if stage.params.pareto_enabled() {
            pareto::run(&candidates, &mut survivors, stage.params.pareto_rounds);
        }
        report.survivors = survivors.iter().filter(|alive| **alive).count();
        if cancel.is_cancelled() {
            return Ok(report.cancelled());
        }

        // === Stage 6: Accept ===
        let accepted = accept::run(
            &candidates,
            &survivors,
            stage.params.acceptance_cap(),
            &ctx.tree,
            iteration,
        )?;
        report.accepted = accepted.accepted;
        if cancel.is_cancelled() {
            return Ok(report.cancelled());
        }

        // === Stage 7: Update tree ===
        update_tree::run(
            &ctx.tree,
            &accepted.modified_parents,
            stage.params.direction(),
            ctx.anchor.as_deref(),
        )?;

        let collaborator_failures = failures.collaborator();
        let missing_records = failures.missing_records();

        ctx.iteration = iteration;
        ctx.elapsed += started.elapsed();
        report.stop = if ctx.goal_reached() {
            Some(StopReason::GoalReached)
        } else {
            ctx.budget_exhausted()
        };

        // === Stage 8: Prune tree ===
        let pruned = prune::run(
            &mut ctx.tree,
            deferred_prunes,
            &PrunePolicy::from(&ctx.params),
        );
        report.pruned = pruned.pruned;
        report.erased = pruned.erased;

        report.collaborator_failures = collaborator_failures;
        report.missing_records = missing_records;
        if collaborator_failures > 0 || missing_records > 0 {
            warn!(
                collaborator_failures,
                missing_records, "Recovered per-candidate failures during iteration"
            );
        }

        reporter.report(Progress::IterationFinished {
            job_id: ctx.job_id,
            iteration,
            candidates: ctx.tree.len(),
            accepted: report.accepted.len(),
        });
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Iteration timing");
        info!(
            leaves = report.leaves,
            generated = report.generated,
            survivors = report.survivors,
            accepted = report.accepted.len(),
            erased = report.erased,
            candidates = ctx.tree.len(),
            stop = ?report.stop,
            "Iteration complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::candidate::CandidateRecord;
    use crate::engine::config::{SearchParams, SearchParamsBuilder};
    use crate::engine::stages::testing::{EchoScorer, SuffixGenerator};
    use std::sync::Mutex;

    fn pipeline(suffixes: Vec<(&'static str, f64)>) -> IterationPipeline {
        IterationPipeline::new(Arc::new(SuffixGenerator { suffixes }), Arc::new(EchoScorer))
    }

    fn context(params: SearchParams) -> SearchContext {
        SearchContext::new(
            params,
            vec!["mutate".to_string()],
            [CandidateRecord::root("a", 0.9), CandidateRecord::root("b", 0.5)],
        )
        .unwrap()
    }

    #[test]
    fn better_neighbor_wins_under_a_cap_of_one() {
        let params = SearchParamsBuilder::new()
            .keep_candidates(1)
            .max_iterations(5)
            .build()
            .unwrap();
        let mut ctx = context(params);
        let pipeline = pipeline(vec![("+", 0.05), ("-", -0.05)]);

        for expected in 1..=5 {
            let report = pipeline
                .run_iteration(&mut ctx, &HashSet::new(), &CancellationToken::new(), &ProgressReporter::new())
                .unwrap();
            assert_eq!(report.iteration, expected);
            assert_eq!(report.accepted.len(), 1);
            assert!(report.accepted[0].ends_with('-'));
            assert_eq!(report.can_continue(), expected < 5);
            ctx.tree.check_invariants().unwrap();
        }

        assert_eq!(ctx.tree.len(), 2 + 5);
        assert_eq!(ctx.iteration, 5);
        assert_eq!(
            ctx.path_to("b-----").unwrap(),
            vec!["b", "b-", "b--", "b---", "b----", "b-----"]
        );
    }

    #[test]
    fn derivations_count_every_attempt() {
        let mut ctx = context(SearchParams::default());
        let pipeline = pipeline(vec![(".x", 0.1), (".x", 0.2), (".y", 0.3)]);

        pipeline
            .run_iteration(&mut ctx, &HashSet::new(), &CancellationToken::new(), &ProgressReporter::new())
            .unwrap();

        assert_eq!(ctx.tree.derivations("a"), 3);
        assert_eq!(ctx.tree.derivations("b"), 3);
        assert_eq!(ctx.tree.len(), 2 + 4);
    }

    #[test]
    fn goal_key_stops_the_job() {
        let params = SearchParamsBuilder::new().goal_key("b-").build().unwrap();
        let mut ctx = context(params);
        let pipeline = pipeline(vec![("-", -0.05)]);

        let report = pipeline
            .run_iteration(&mut ctx, &HashSet::new(), &CancellationToken::new(), &ProgressReporter::new())
            .unwrap();
        assert_eq!(report.stop, Some(StopReason::GoalReached));
    }

    #[test]
    fn cancellation_before_the_first_stage_short_circuits() {
        let mut ctx = context(SearchParams::default());
        let pipeline = pipeline(vec![("-", -0.05)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline
            .run_iteration(&mut ctx, &HashSet::new(), &cancel, &ProgressReporter::new())
            .unwrap();

        assert_eq!(report.stop, Some(StopReason::Cancelled));
        assert_eq!(ctx.iteration, 0);
        assert_eq!(ctx.tree.len(), 2);
    }

    #[test]
    fn invalid_parameters_are_rejected_before_any_stage() {
        let mut ctx = context(SearchParams::default());
        ctx.params.keep_candidates = 0;
        let pipeline = pipeline(vec![("-", -0.05)]);

        let result = pipeline.run_iteration(
            &mut ctx,
            &HashSet::new(),
            &CancellationToken::new(),
            &ProgressReporter::new(),
        );

        assert!(matches!(result, Err(EngineError::Config { .. })));
        assert!(!result.unwrap_err().is_corruption());
        assert_eq!(ctx.tree.len(), 2);
        assert_eq!(ctx.tree.derivations("a"), 0);
    }

    #[test]
    fn deferred_prunes_are_applied_at_the_end_of_the_iteration() {
        let params = SearchParamsBuilder::new().keep_candidates(-1).build().unwrap();
        let mut ctx = context(params);
        let pipeline = pipeline(vec![("-", -0.05)]);
        let (cancel, reporter) = (CancellationToken::new(), ProgressReporter::new());

        pipeline.run_iteration(&mut ctx, &HashSet::new(), &cancel, &reporter).unwrap();
        let deferred = HashSet::from(["a-".to_string()]);
        let report = pipeline.run_iteration(&mut ctx, &deferred, &cancel, &reporter).unwrap();

        assert_eq!(report.pruned, vec!["a-"]);
        assert!(!ctx.tree.contains("a-") && !ctx.tree.contains("a--"));
        assert_eq!(ctx.tree.pruned_this_iteration(), ["a-".to_string(), "a--".to_string()]);
        assert!(ctx.tree.get("a").unwrap().historic_children.contains("a-"));
    }

    #[test]
    fn progress_reports_each_phase_and_the_iteration_summary() {
        let mut ctx = context(SearchParams::default());
        let pipeline = pipeline(vec![("-", -0.05)]);
        let phases = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event: Progress| match event {
            Progress::PhaseStart { name } => phases.lock().unwrap().push(name.to_string()),
            Progress::IterationFinished { accepted, .. } => {
                phases.lock().unwrap().push(format!("accepted {accepted}"))
            }
            _ => {}
        }));

        pipeline
            .run_iteration(&mut ctx, &HashSet::new(), &CancellationToken::new(), &reporter)
            .unwrap();
        drop(reporter);

        assert_eq!(
            phases.into_inner().unwrap(),
            vec!["Generate neighbors", "Score", "accepted 2"]
        );
    }
}
