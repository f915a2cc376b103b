//! Routine errors
//!
//! Three families: configuration (bad routine description), I/O (shared file
//! and artifacts), and external module failures. None of them are recovered;
//! they propagate to the routine caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::expr::ExprError;

/// Routine result type
pub type Result<T> = std::result::Result<T, RoutineError>;

#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("variable '{name}' used in objective '{expression}' is not registered")]
    UnknownVariable { name: String, expression: String },

    #[error("module '{0}' is not in the catalog")]
    UnknownModule(String),

    #[error("variable '{0}' is registered twice")]
    DuplicateVariable(String),

    #[error("cannot compute bounds for '{name}': unsupported {kind} value")]
    UnsupportedBounds { name: String, kind: &'static str },

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shared file error: {0}")]
    Store(String),

    #[error("history table error: {0}")]
    History(String),

    #[error("module '{module}' did not produce '{name}' at {path}")]
    MissingOutput {
        module: String,
        name: String,
        path: String,
    },

    #[error("module '{module}' failed (status {status:?}): {stderr}")]
    ModuleFailed {
        module: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl RoutineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
