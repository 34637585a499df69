use super::{build_pipeline, drive, open_scheduler, open_store, print_job_result};
use crate::cli::ResumeArgs;
use crate::config::PartialSearchConfig;
use crate::error::{CliError, Result};
use molpath::core::models::ids::JobId;
use tracing::info;

pub fn run(args: ResumeArgs) -> Result<()> {
    let store = open_store(Some(args.storage.as_path()));
    let origin = JobId(args.job);
    let mut snapshot = store.load_latest(origin)?.ok_or_else(|| {
        CliError::Config(format!(
            "No snapshots of job {origin} in {}",
            args.storage.display()
        ))
    })?;
    info!(job_id = %origin, iteration = snapshot.iteration, "Loaded latest snapshot");

    if !args.set_values.is_empty() {
        let mut partial = PartialSearchConfig::default();
        partial.apply_set_values(&args.set_values)?;
        snapshot.params = partial.overlay(snapshot.params)?;
    }

    let scheduler = open_scheduler(store, args.interactive)?;
    let (pipeline, _) = build_pipeline(&args.domain, Some(args.storage.as_path()))?;
    let id = scheduler.restore_job(snapshot, &args.password)?;
    println!("Resumed job {origin} as job {id}.");

    let summary = drive(&scheduler, &pipeline, args.interactive)?;
    println!(
        "Worker finished: {} iteration(s), {} failed.",
        summary.iterations, summary.failed_iterations
    );
    print_job_result(&scheduler, id, &args.password)
}
