//! Line-oriented control console used by `--interactive` sessions.

use crate::config::PartialSearchConfig;
use crate::error::{CliError, Result};
use molpath::core::models::ids::JobId;
use molpath::scheduler::JobScheduler;
use std::io::BufRead;
use tracing::{info, warn};

const HELP: &str = "\
commands:
  jobs
  pause <job> <password>
  resume <job> <password>
  remove <job> <password>
  reorder <job> <delta> <password>
  set <job> <password> <key=value>...
  operators <job> <password> <operator>...
  prune <job> <password> <key>...
  halt";

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Jobs,
    Pause { job: JobId, password: String },
    Resume { job: JobId, password: String },
    Remove { job: JobId, password: String },
    Reorder { job: JobId, delta: i64, password: String },
    Set { job: JobId, password: String, assignments: Vec<String> },
    Operators { job: JobId, password: String, operators: Vec<String> },
    Prune { job: JobId, password: String, keys: Vec<String> },
    Halt,
    Help,
}

pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let job = |index: usize| -> Result<JobId> {
        let raw = rest
            .get(index)
            .ok_or_else(|| CliError::Argument(format!("'{verb}' needs a job id")))?;
        raw.parse::<u64>()
            .map(JobId)
            .map_err(|_| CliError::Argument(format!("invalid job id '{raw}'")))
    };
    let word = |index: usize, what: &str| -> Result<String> {
        rest.get(index)
            .map(|w| w.to_string())
            .ok_or_else(|| CliError::Argument(format!("'{verb}' needs {what}")))
    };
    let tail = |from: usize| -> Vec<String> { rest.iter().skip(from).map(|w| w.to_string()).collect() };

    let command = match verb {
        "jobs" | "ls" => ConsoleCommand::Jobs,
        "pause" => ConsoleCommand::Pause {
            job: job(0)?,
            password: word(1, "a password")?,
        },
        "resume" => ConsoleCommand::Resume {
            job: job(0)?,
            password: word(1, "a password")?,
        },
        "remove" | "rm" => ConsoleCommand::Remove {
            job: job(0)?,
            password: word(1, "a password")?,
        },
        "reorder" => {
            let raw = word(1, "a delta")?;
            let delta = raw
                .parse::<i64>()
                .map_err(|_| CliError::Argument(format!("invalid delta '{raw}'")))?;
            ConsoleCommand::Reorder {
                job: job(0)?,
                delta,
                password: word(2, "a password")?,
            }
        }
        "set" => ConsoleCommand::Set {
            job: job(0)?,
            password: word(1, "a password")?,
            assignments: tail(2),
        },
        "operators" => ConsoleCommand::Operators {
            job: job(0)?,
            password: word(1, "a password")?,
            operators: tail(2),
        },
        "prune" => ConsoleCommand::Prune {
            job: job(0)?,
            password: word(1, "a password")?,
            keys: tail(2),
        },
        "halt" | "quit" | "exit" => ConsoleCommand::Halt,
        "help" | "?" => ConsoleCommand::Help,
        other => return Err(CliError::Argument(format!("unknown command '{other}'"))),
    };
    Ok(Some(command))
}

/// Executes one command. Returns `false` once the session should end.
pub fn execute(scheduler: &JobScheduler, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Jobs => {
            for job in scheduler.jobs() {
                println!(
                    "{:>4}  {:<9} iteration {:>4}  {:>6} candidates  {}",
                    job.id,
                    format!("{:?}", job.state),
                    job.iteration,
                    job.candidates,
                    job.outcome.map(|o| format!("{o:?}")).unwrap_or_default()
                );
            }
        }
        ConsoleCommand::Pause { job, password } => scheduler.pause(job, &password)?,
        ConsoleCommand::Resume { job, password } => scheduler.resume(job, &password)?,
        ConsoleCommand::Remove { job, password } => scheduler.remove(job, &password)?,
        ConsoleCommand::Reorder {
            job,
            delta,
            password,
        } => {
            let position = scheduler.reorder(job, delta, &password)?;
            println!("job {job} is now at position {position}");
        }
        ConsoleCommand::Set {
            job,
            password,
            assignments,
        } => {
            let current = scheduler.committed(job, &password)?.params;
            let mut partial = PartialSearchConfig::default();
            partial.apply_set_values(&assignments)?;
            scheduler.set_params(job, partial.overlay(current)?, &password)?;
        }
        ConsoleCommand::Operators {
            job,
            password,
            operators,
        } => scheduler.set_operators(job, operators, &password)?,
        ConsoleCommand::Prune {
            job,
            password,
            keys,
        } => scheduler.request_prune(job, keys, &password)?,
        ConsoleCommand::Halt => return Ok(false),
        ConsoleCommand::Help => println!("{HELP}"),
    }
    Ok(true)
}

/// Reads commands until `halt` or end of input, then halts the scheduler.
pub fn run(scheduler: &JobScheduler, input: impl BufRead) -> Result<()> {
    info!("Interactive console ready; type 'help' for commands.");
    for line in input.lines() {
        let line = line?;
        let outcome = parse_command(&line).and_then(|command| match command {
            Some(command) => execute(scheduler, command),
            None => Ok(true),
        });
        match outcome {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!("Console command rejected: {}", e);
                eprintln!("error: {e}");
            }
        }
    }
    scheduler.halt();
    Ok(())
}
