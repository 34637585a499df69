use crate::engine::pipeline::IterationPipeline;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::scheduler::{JobLease, JobScheduler};
use tracing::{error, info, instrument};

/// What a worker did before the scheduler released it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub leases: usize,
    pub iterations: usize,
    pub failed_iterations: usize,
}

/// Runs the worker loop until [`JobScheduler::fetch_next_job`] signals termination.
///
/// Each lease is iterated until the scheduler reports that the job left the live queue. A failed
/// iteration ends the lease; if the job is still live it is leased again from its last committed
/// state.
#[instrument(skip_all, name = "search_worker")]
pub fn run(
    scheduler: &JobScheduler,
    pipeline: &IterationPipeline,
    reporter: &ProgressReporter,
) -> WorkerSummary {
    let mut summary = WorkerSummary::default();

    while let Some(JobLease {
        mut context,
        cancel,
    }) = scheduler.fetch_next_job()
    {
        summary.leases += 1;
        reporter.report(Progress::JobStarted {
            job_id: context.job_id,
            iteration: context.iteration,
        });

        loop {
            let prunes = scheduler.take_deferred(context.job_id).apply_to(&mut context);
            match pipeline.run_iteration(&mut context, &prunes, &cancel, reporter) {
                Ok(report) => {
                    summary.iterations += 1;
                    if !scheduler.commit_iteration(&context, &report) {
                        break;
                    }
                }
                Err(e) => {
                    summary.failed_iterations += 1;
                    error!(job_id = %context.job_id, error = %e, "Iteration aborted");
                    reporter.report(Progress::Message(format!(
                        "job {} | iteration {} failed: {e}",
                        context.job_id,
                        context.iteration + 1
                    )));
                    scheduler.abort_iteration(context.job_id, &e);
                    break;
                }
            }
        }
    }

    info!(
        leases = summary.leases,
        iterations = summary.iterations,
        failed_iterations = summary.failed_iterations,
        "Worker finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::candidate::CandidateRecord;
    use crate::engine::config::{SearchParams, SearchParamsBuilder};
    use crate::engine::context::{SearchContext, StopReason};
    use crate::engine::snapshot::{FsSnapshotStore, MemorySnapshotStore, SnapshotStore};
    use crate::engine::stages::testing::{EchoScorer, SuffixGenerator};
    use crate::scheduler::{JobOutcome, QueueState};
    use std::sync::Arc;

    fn pipeline(scratch: &std::path::Path) -> IterationPipeline {
        IterationPipeline::new(
            Arc::new(SuffixGenerator {
                suffixes: vec![("+", 0.05), ("-", -0.05)],
            }),
            Arc::new(EchoScorer),
        )
        .with_scratch_dir(scratch)
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
    fn job_runs_to_its_iteration_limit_and_every_iteration_is_stored() {
        let storage = tempfile::tempdir().unwrap();
        let store = Arc::new(FsSnapshotStore::new(storage.path()));
        let scheduler = JobScheduler::new(store.clone(), false);
        let params = SearchParamsBuilder::new()
            .keep_candidates(1)
            .max_iterations(5)
            .build()
            .unwrap();
        let id = scheduler.create_job(context(params), "pw").unwrap();

        let summary = run(&scheduler, &pipeline(storage.path()), &ProgressReporter::new());

        assert_eq!(summary.leases, 1);
        assert_eq!(summary.iterations, 5);
        assert_eq!(summary.failed_iterations, 0);
        let job = &scheduler.jobs()[0];
        assert_eq!(job.state, QueueState::Finished);
        assert_eq!(
            job.outcome,
            Some(JobOutcome::Stopped(StopReason::IterationLimit))
        );
        assert_eq!(job.candidates, 7);
        assert_eq!(store.latest_iteration(id).unwrap(), Some(5));

        let last = SearchContext::from_snapshot(scheduler.committed(id, "pw").unwrap()).unwrap();
        assert_eq!(
            last.path_to("b-----").unwrap(),
            vec!["b", "b-", "b--", "b---", "b----", "b-----"]
        );
        let third = scheduler.history(id, 3, "pw").unwrap();
        assert!(third.candidates.contains_key("b---"));
        assert!(!third.candidates.contains_key("b----"));
    }

    #[test]
    fn jobs_run_in_queue_order() {
        let scratch = tempfile::tempdir().unwrap();
        let scheduler = JobScheduler::new(Arc::new(MemorySnapshotStore::new()), false);
        let params = SearchParamsBuilder::new()
            .keep_candidates(1)
            .max_iterations(2)
            .build()
            .unwrap();
        let first = scheduler.create_job(context(params.clone()), "pw").unwrap();
        let second = scheduler.create_job(context(params), "pw").unwrap();

        let order = std::sync::Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event: Progress| {
            if let Progress::IterationFinished { job_id, .. } = event {
                order.lock().unwrap().push(job_id);
            }
        }));

        let summary = run(&scheduler, &pipeline(scratch.path()), &reporter);
        drop(reporter);

        assert_eq!(summary.leases, 2);
        assert_eq!(
            order.into_inner().unwrap(),
            vec![first, first, second, second]
        );
    }

    #[test]
    fn goal_key_finishes_the_job_early() {
        let scratch = tempfile::tempdir().unwrap();
        let scheduler = JobScheduler::new(Arc::new(MemorySnapshotStore::new()), false);
        let params = SearchParamsBuilder::new()
            .keep_candidates(1)
            .goal_key("b--")
            .build()
            .unwrap();
        scheduler.create_job(context(params), "pw").unwrap();

        let summary = run(&scheduler, &pipeline(scratch.path()), &ProgressReporter::new());

        assert_eq!(summary.iterations, 2);
        assert_eq!(
            scheduler.jobs()[0].outcome,
            Some(JobOutcome::Stopped(StopReason::GoalReached))
        );
    }

    #[test]
    fn parameter_change_survives_a_pause_of_the_iteration_that_applied_it() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let scratch = tempfile::tempdir().unwrap();
        let scheduler = JobScheduler::new(Arc::new(MemorySnapshotStore::new()), false);
        let id = scheduler
            .create_job(context(SearchParams::default()), "pw")
            .unwrap();
        let lowered = SearchParamsBuilder::new().max_iterations(3).build().unwrap();

        // Iteration 1 receives the change, iteration 2 applies it and is paused mid-way.
        let scored = AtomicUsize::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|event: Progress| {
            if let Progress::PhaseStart { name: "Score" } = event {
                match scored.fetch_add(1, Ordering::SeqCst) {
                    0 => scheduler.set_params(id, lowered.clone(), "pw").unwrap(),
                    1 => scheduler.pause(id, "pw").unwrap(),
                    _ => {}
                }
            }
        }));
        let first = run(&scheduler, &pipeline(scratch.path()), &reporter);
        drop(reporter);

        assert_eq!(first.iterations, 2);
        assert_eq!(scheduler.job_state(id), Some(QueueState::Sleeping));
        let committed = scheduler.committed(id, "pw").unwrap();
        assert_eq!(committed.iteration, 1);
        assert_eq!(committed.params.max_iterations, 3);

        scheduler.resume(id, "pw").unwrap();
        let second = run(&scheduler, &pipeline(scratch.path()), &ProgressReporter::new());

        assert_eq!(second.iterations, 2);
        let job = &scheduler.jobs()[0];
        assert_eq!(job.iteration, 3);
        assert_eq!(
            job.outcome,
            Some(JobOutcome::Stopped(StopReason::IterationLimit))
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_puts_the_job_to_sleep_after_repeated_failures() {
        let scratch = tempfile::tempdir().unwrap();
        let scheduler = JobScheduler::new(Arc::new(MemorySnapshotStore::new()), false);
        let params = SearchParams {
            score_script: Some("false".to_string()),
            max_stage_failures: 2,
            ..SearchParams::default()
        };
        let id = scheduler.create_job(context(params), "pw").unwrap();

        let summary = run(&scheduler, &pipeline(scratch.path()), &ProgressReporter::new());

        assert_eq!(summary.leases, 2);
        assert_eq!(summary.failed_iterations, 2);
        assert_eq!(scheduler.job_state(id), Some(QueueState::Sleeping));
        assert_eq!(scheduler.committed(id, "pw").unwrap().iteration, 0);
    }
}
