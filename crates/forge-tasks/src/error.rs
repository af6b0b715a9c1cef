use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task store not initialized (expected config at {0})")]
    NotInitialized(PathBuf),

    #[error("task store already initialized at {0} (use force to overwrite)")]
    AlreadyInitialized(PathBuf),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("malformed task file {path}: {reason}")]
    MalformedTask { path: PathBuf, reason: String },

    #[error("dependency cycle through {0}")]
    CyclicDependency(String),

    #[error("acceptance criterion index {index} out of range 1..={len}")]
    InvalidAcIndex { index: usize, len: usize },

    #[error("invalid task id: {0}")]
    InvalidId(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
