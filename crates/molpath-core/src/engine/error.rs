use thiserror::Error;

use super::config::ConfigError;
use crate::core::io::script::ScriptError;
use crate::core::tree::TreeError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid search configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Search tree invariant violated: {source}")]
    Tree {
        #[from]
        source: TreeError,
    },

    #[error("Stage '{stage}' failed: {source}")]
    Script {
        stage: &'static str,
        source: ScriptError,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Structural corruption cannot be fixed by retrying the iteration.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Tree { .. })
    }
}
