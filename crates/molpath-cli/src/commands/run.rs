use super::{build_pipeline, drive, open_scheduler, open_store, print_job_result};
use crate::cli::RunArgs;
use crate::config::JobFile;
use crate::domain::OPERATORS;
use crate::error::{CliError, Result};
use molpath::engine::context::SearchContext;
use tracing::info;

pub fn run(args: RunArgs) -> Result<()> {
    let storage = args.storage.as_deref();
    let scheduler = open_scheduler(open_store(storage), args.interactive)?;
    let (pipeline, scorer) = build_pipeline(&args.domain, storage)?;

    let mut submitted = Vec::with_capacity(args.jobs.len());
    for path in &args.jobs {
        let mut job = JobFile::from_file(path)?.resolve(&args.set_values, &OPERATORS)?;
        if job.params.goal_key.is_none() {
            job.params.goal_key = Some(args.domain.target.clone());
        }

        let roots = job.roots.iter().map(|key| scorer.root(key));
        let mut context = SearchContext::new(job.params, job.operators, roots).map_err(|e| {
            CliError::Config(format!("Invalid roots in {}: {e}", path.display()))
        })?;
        if let Some(anchor) = job.anchor {
            context = context.with_anchor(anchor);
        }

        let id = scheduler.create_job(context, &job.password)?;
        info!(job_id = %id, file = %path.display(), "Submitted job");
        println!("Submitted {} as job {id}.", path.display());
        submitted.push((id, job.password));
    }

    let summary = drive(&scheduler, &pipeline, args.interactive)?;
    println!(
        "Worker finished: {} iteration(s), {} failed.",
        summary.iterations, summary.failed_iterations
    );

    for (id, password) in &submitted {
        print_job_result(&scheduler, *id, password)?;
    }
    Ok(())
}
