use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, instrument};

const INPUT_FILE: &str = "input.txt";
const OUTPUT_FILE: &str = "output.txt";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script command is empty")]
    EmptyCommand,

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to launch script '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Script '{command}' exited unsuccessfully ({status})")]
    NonZeroExit { command: String, status: String },

    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },

    #[error("Malformed value '{value}' for '{key}' in '{path}'")]
    MalformedValue {
        path: String,
        key: String,
        value: String,
    },
}

/// Result of one exchange with an external command, keyed by candidate identity.
pub type ScriptRecords = HashMap<String, Vec<f64>>;

/// Runs an external command over a batch of candidate keys.
///
/// The protocol is file based: the keys are written one per line to an input file inside a
/// working directory, the command is invoked as `<command> -i <input> -o <output>`, and every
/// non-empty output line is read back as `key,value[,value...]`. Output order is irrelevant;
/// callers match records by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRunner {
    command: String,
}

impl ScriptRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Executes one exchange inside `work_dir`, which is created if needed.
    ///
    /// # Errors
    ///
    /// Fails if the working files cannot be written or read, if the command cannot be launched
    /// or exits with a non-zero status, or if the output is not valid CSV with numeric values.
    #[instrument(level = "debug", skip_all, fields(command = %self.command))]
    pub fn exchange<'k>(
        &self,
        work_dir: &Path,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<ScriptRecords, ScriptError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(ScriptError::EmptyCommand)?;

        fs::create_dir_all(work_dir).map_err(|e| io_error(work_dir, e))?;
        let input = work_dir.join(INPUT_FILE);
        let output = work_dir.join(OUTPUT_FILE);
        write_keys(&input, keys)?;

        let status = Command::new(program)
            .args(parts)
            .arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .current_dir(work_dir)
            .status()
            .map_err(|e| ScriptError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;
        if !status.success() {
            return Err(ScriptError::NonZeroExit {
                command: self.command.clone(),
                status: status.to_string(),
            });
        }

        let records = read_records(&output)?;
        debug!(records = records.len(), "Script exchange finished");
        Ok(records)
    }
}

/// Working directory for one exchange of a job's iteration, e.g. `<root>/7/12_filter`.
pub fn work_dir(root: &Path, job: impl std::fmt::Display, iteration: u32, purpose: &str) -> PathBuf {
    root.join(job.to_string())
        .join(format!("{iteration}_{purpose}"))
}

fn io_error(path: &Path, source: std::io::Error) -> ScriptError {
    ScriptError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

fn write_keys<'k>(path: &Path, keys: impl IntoIterator<Item = &'k str>) -> Result<(), ScriptError> {
    let file = fs::File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    for key in keys {
        writeln!(writer, "{key}").map_err(|e| io_error(path, e))?;
    }
    writer.flush().map_err(|e| io_error(path, e))
}

fn read_records(path: &Path) -> Result<ScriptRecords, ScriptError> {
    let path_str = path.to_string_lossy().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ScriptError::Csv {
            path: path_str.clone(),
            source: e,
        })?;

    let mut records = HashMap::new();
    for row in reader.records() {
        let row = row.map_err(|e| ScriptError::Csv {
            path: path_str.clone(),
            source: e,
        })?;
        let mut fields = row.iter();
        let Some(key) = fields.next().filter(|key| !key.is_empty()) else {
            continue;
        };
        let values = fields
            .map(|value| {
                value.parse::<f64>().map_err(|_| ScriptError::MalformedValue {
                    path: path_str.clone(),
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        records.insert(key.to_string(), values);
    }
    Ok(records)
}
