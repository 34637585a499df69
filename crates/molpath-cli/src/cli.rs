use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Molpath Developers",
    version,
    about = "molpath CLI - runs and inspects iterative tree searches over candidate structures.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit one or more job files and run them to completion.
    Run(RunArgs),
    /// Continue a stored job from its latest snapshot.
    Resume(ResumeArgs),
    /// Print a stored iteration of a job.
    History(HistoryArgs),
}

/// Options of the built-in string-morphing domain.
#[derive(Args, Debug, Clone)]
pub struct DomainArgs {
    /// String every job tries to reach.
    #[arg(short, long, required = true, value_name = "STRING")]
    pub target: String,

    /// Characters available to insertions and substitutions.
    #[arg(long, value_name = "CHARS", default_value = "abcdefghijklmnopqrstuvwxyz")]
    pub alphabet: String,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Job files in TOML format. Jobs are queued in the given order.
    #[arg(required = true, value_name = "PATH")]
    pub jobs: Vec<PathBuf>,

    #[command(flatten)]
    pub domain: DomainArgs,

    /// Directory receiving one JSON snapshot per committed iteration.
    /// Snapshots are kept in memory when omitted.
    #[arg(short, long, value_name = "DIR")]
    pub storage: Option<PathBuf>,

    /// Keep the scheduler alive and read control commands from standard input.
    #[arg(short, long)]
    pub interactive: bool,

    /// Set a search parameter for every job, overriding the job files.
    /// Can be used multiple times. Example: -S keep-candidates=10
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `resume` subcommand.
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Directory the job's snapshots were written to.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub storage: PathBuf,

    /// Id of the stored job.
    #[arg(long, required = true, value_name = "ID")]
    pub job: u64,

    /// Password of the restored job.
    #[arg(short, long, default_value = "", value_name = "PASSWORD")]
    pub password: String,

    #[command(flatten)]
    pub domain: DomainArgs,

    /// Keep the scheduler alive and read control commands from standard input.
    #[arg(short, long)]
    pub interactive: bool,

    /// Override a search parameter of the restored job.
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `history` subcommand.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Directory the job's snapshots were written to.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub storage: PathBuf,

    /// Id of the stored job.
    #[arg(long, required = true, value_name = "ID")]
    pub job: u64,

    /// Iteration to print. Defaults to the latest stored one.
    #[arg(short = 'n', long, value_name = "N")]
    pub iteration: Option<u32>,

    /// Also print every candidate of the iteration.
    #[arg(long)]
    pub candidates: bool,
}
