use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("parse error: {message}")]
    Parse {
        message: String,
        step_index: Option<usize>,
    },

    #[error("unknown chain '{name}' (available: {})", available.join(", "))]
    UnknownChain {
        name: String,
        available: Vec<String>,
    },

    #[error("variable ${{{0}}} is not bound")]
    MissingVariable(String),

    #[error("prompt file not found: {0}")]
    PromptFileNotFound(PathBuf),

    #[error("prompt file {path} unreadable: {cause}")]
    PromptFileUnreadable {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("chain config not found (looked for {0})")]
    ConfigNotFound(PathBuf),

    #[error("invalid chain config {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("agent '{agent}' could not be launched: {cause}")]
    AgentUnavailable {
        agent: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    pub fn parse(message: impl Into<String>) -> Self {
        ChainError::Parse {
            message: message.into(),
            step_index: None,
        }
    }

    pub fn parse_at(message: impl Into<String>, step_index: usize) -> Self {
        ChainError::Parse {
            message: message.into(),
            step_index: Some(step_index),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
