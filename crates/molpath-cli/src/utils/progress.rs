use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use molpath::core::models::ids::JobId;
use molpath::engine::progress::{Progress, ProgressCallback};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK_MS: u64 = 80;

struct Board {
    multi: MultiProgress,
    /// Spinner or bar of the stage currently running.
    stage: ProgressBar,
    /// One status line per job seen so far, in lease order.
    jobs: HashMap<JobId, ProgressBar>,
}

impl Board {
    fn job_line(&mut self, job_id: JobId) -> &ProgressBar {
        let Self { multi, stage, jobs } = self;
        jobs.entry(job_id).or_insert_with(|| {
            let line = multi.insert_before(stage, ProgressBar::new(0));
            line.set_style(CliProgressHandler::job_style());
            line.set_prefix(format!("job {job_id}"));
            line
        })
    }
}

/// Renders search progress on stderr.
///
/// Every job gets a status line that tracks its latest iteration. Below them a single line shows
/// the stage the worker is in, as a spinner or, for fan-out work, a bar.
#[derive(Clone)]
pub struct CliProgressHandler {
    board: Arc<Mutex<Board>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let stage = multi.add(
            ProgressBar::new(0)
                .with_style(Self::spinner_style())
                .with_message("Waiting for jobs..."),
        );

        Self {
            board: Arc::new(Mutex::new(Board {
                multi,
                stage,
                jobs: HashMap::new(),
            })),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let board = self.board.clone();

        Box::new(move |progress: Progress| {
            let Ok(mut board) = board.lock() else {
                warn!("Progress display mutex was poisoned. Cannot update progress.");
                return;
            };

            match progress {
                Progress::JobStarted { job_id, iteration } => {
                    let line = board.job_line(job_id);
                    line.reset();
                    line.set_message(format!("running from iteration {iteration}"));
                }
                Progress::PhaseStart { name } => {
                    let stage = &board.stage;
                    stage.reset();
                    stage.set_length(0);
                    stage.set_style(Self::spinner_style());
                    stage.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                    stage.set_message(name.to_string());
                }
                Progress::PhaseFinish => {
                    board.stage.disable_steady_tick();
                }
                Progress::TaskStart { total_steps } => {
                    let stage = &board.stage;
                    stage.disable_steady_tick();
                    stage.set_length(total_steps);
                    stage.set_position(0);
                    stage.set_style(Self::bar_style());
                }
                Progress::TaskIncrement => board.stage.inc(1),
                Progress::TaskFinish => {
                    let length = board.stage.length().unwrap_or(0);
                    board.stage.set_position(length);
                }
                Progress::IterationFinished {
                    job_id,
                    iteration,
                    candidates,
                    accepted,
                } => {
                    board.job_line(job_id).set_message(format!(
                        "iteration {iteration:>4} | {candidates:>6} candidates | +{accepted}"
                    ));
                    board.stage.set_message("Waiting for the scheduler...");
                }
                Progress::Message(msg) => {
                    if board.multi.println(format!("  {msg}")).is_err() {
                        board.stage.set_message(msg);
                    }
                }
            }
        })
    }

    fn job_style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:>8.bold} {msg}")
            .expect("Failed to create job line style template")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .expect("Failed to create spinner style template")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<20} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("Failed to create bar style template")
            .with_key(
                "eta",
                |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                },
            )
            .progress_chars("##-")
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}
