pub mod history;
pub mod resume;
pub mod run;

use crate::cli::DomainArgs;
use crate::console;
use crate::domain::{MorphGenerator, TargetDistance};
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use molpath::core::models::ids::JobId;
use molpath::engine::context::SearchContext;
use molpath::engine::pipeline::IterationPipeline;
use molpath::engine::progress::ProgressReporter;
use molpath::engine::snapshot::{FsSnapshotStore, MemorySnapshotStore, SnapshotStore};
use molpath::scheduler::JobScheduler;
use molpath::workflows::search::{self, WorkerSummary};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Snapshot store for `storage`, or an in-memory one when no directory is given.
pub(crate) fn open_store(storage: Option<&Path>) -> Arc<dyn SnapshotStore> {
    match storage {
        Some(dir) => Arc::new(FsSnapshotStore::new(dir)),
        None => Arc::new(MemorySnapshotStore::new()),
    }
}

/// A scheduler whose ids continue after the jobs already present in `store`.
pub(crate) fn open_scheduler(
    store: Arc<dyn SnapshotStore>,
    interactive: bool,
) -> Result<JobScheduler> {
    let next = store
        .job_ids()?
        .last()
        .map(|last| JobId(last.0 + 1))
        .unwrap_or(JobId(1));
    Ok(JobScheduler::new(store, interactive).with_next_id(next))
}

pub(crate) fn build_pipeline(
    domain: &DomainArgs,
    storage: Option<&Path>,
) -> Result<(IterationPipeline, Arc<TargetDistance>)> {
    let generator = MorphGenerator::new(&domain.alphabet).map_err(CliError::Argument)?;
    let scorer = Arc::new(TargetDistance::new(&domain.target));
    let mut pipeline = IterationPipeline::new(Arc::new(generator), scorer.clone());
    if let Some(dir) = storage {
        pipeline = pipeline.with_scratch_dir(dir.join("scratch"));
    }
    Ok((pipeline, scorer))
}

/// Runs the worker until every job has left the live queue, or, in interactive mode, until the
/// console halts the scheduler.
pub(crate) fn drive(
    scheduler: &JobScheduler,
    pipeline: &IterationPipeline,
    interactive: bool,
) -> Result<WorkerSummary> {
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    if !interactive {
        return Ok(search::run(scheduler, pipeline, &reporter));
    }

    std::thread::scope(|scope| {
        let worker = scope.spawn(|| search::run(scheduler, pipeline, &reporter));
        let console_result = console::run(scheduler, std::io::stdin().lock());
        if console_result.is_err() {
            scheduler.halt();
        }
        let summary = worker
            .join()
            .map_err(|_| CliError::Other(anyhow::anyhow!("Search worker panicked")))?;
        console_result.map(|_| summary)
    })
}

/// Prints the state and best candidate of `job`.
pub(crate) fn print_job_result(scheduler: &JobScheduler, job: JobId, password: &str) -> Result<()> {
    let Some(summary) = scheduler.jobs().into_iter().find(|summary| summary.id == job) else {
        println!("Job {job} was removed.");
        return Ok(());
    };
    let snapshot = scheduler.committed(job, password)?;
    let outcome = summary
        .outcome
        .as_ref()
        .map(|outcome| format!(" ({outcome:?})"))
        .unwrap_or_default();
    println!(
        "Job {job}: {:?}{outcome} after {} iteration(s), {} candidate(s) in the tree.",
        summary.state, summary.iteration, summary.candidates
    );

    let Some(best) = snapshot.best().cloned() else {
        return Ok(());
    };
    let context = SearchContext::from_snapshot(snapshot)
        .map_err(|e| CliError::Other(anyhow::anyhow!("Stored tree is inconsistent: {e}")))?;
    let path = context
        .path_to(&best.key)
        .map_err(|e| CliError::Other(anyhow::anyhow!("Stored tree is inconsistent: {e}")))?;
    println!("  best:  {} (score {:.4})", best.key, best.score);
    println!("  path:  {}", path.join(" -> "));
    info!(job_id = %job, best = %best.key, score = best.score, "Reported job result");
    Ok(())
}
