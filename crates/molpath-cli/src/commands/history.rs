use crate::cli::HistoryArgs;
use crate::error::{CliError, Result};
use molpath::core::models::ids::JobId;
use molpath::engine::snapshot::{FsSnapshotStore, IterationSnapshot, SnapshotStore};

pub fn run(args: HistoryArgs) -> Result<()> {
    let store = FsSnapshotStore::new(&args.storage);
    let job = JobId(args.job);
    let iteration = match args.iteration {
        Some(iteration) => iteration,
        None => store.latest_iteration(job)?.ok_or_else(|| {
            CliError::Config(format!("No snapshots of job {job} in {}", args.storage.display()))
        })?,
    };
    let snapshot = store.load(job, iteration)?.ok_or_else(|| {
        CliError::Config(format!("Job {job} has no stored iteration {iteration}"))
    })?;

    print!("{}", render(&snapshot, args.candidates));
    Ok(())
}

fn render(snapshot: &IterationSnapshot, with_candidates: bool) -> String {
    let mut out = format!(
        "job {} iteration {} ({:.1}s elapsed)\n  roots: {}\n  operators: {}\n  candidates: {}\n",
        snapshot.job_id,
        snapshot.iteration,
        snapshot.elapsed_seconds,
        snapshot.roots.join(", "),
        snapshot.operators.join(", "),
        snapshot.candidates.len(),
    );
    if let Some(best) = snapshot.best() {
        out.push_str(&format!("  best: {} (score {:.4})\n", best.key, best.score));
    }
    if !snapshot.pruned.is_empty() {
        out.push_str(&format!("  pruned: {}\n", snapshot.pruned.join(", ")));
    }
    if with_candidates {
        for record in snapshot.candidates.values() {
            out.push_str(&format!(
                "    {:<24} score {:>8.4}  parent {:<24} stale {}\n",
                record.key,
                record.score,
                record.parent.as_deref().unwrap_or("-"),
                record.iters_without_improvement
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use molpath::core::models::candidate::CandidateRecord;
    use molpath::engine::context::SearchContext;

    fn snapshot() -> IterationSnapshot {
        let context = SearchContext::new(
            Default::default(),
            vec!["swap".to_string()],
            [CandidateRecord::root("ab", 0.5), CandidateRecord::root("ba", 0.25)],
        )
        .unwrap();
        context.to_snapshot()
    }

    #[test]
    fn render_summarizes_the_iteration() {
        let text = render(&snapshot(), false);
        assert!(text.contains("iteration 0"));
        assert!(text.contains("roots: ab, ba"));
        assert!(text.contains("best: ba (score 0.2500)"));
        assert!(!text.contains("parent"));
    }

    #[test]
    fn stored_iterations_are_loaded_from_the_storage_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path());
        store.save(&snapshot()).unwrap();

        let args = HistoryArgs {
            storage: dir.path().to_path_buf(),
            job: 0,
            iteration: None,
            candidates: true,
        };
        run(args).unwrap();

        let missing = HistoryArgs {
            storage: dir.path().to_path_buf(),
            job: 4,
            iteration: None,
            candidates: false,
        };
        assert!(matches!(run(missing), Err(CliError::Config(_))));
    }
}
