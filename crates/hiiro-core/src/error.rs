use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Everything a task/subtask command can report back to the user.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{kind} '{query}' not found")]
    NotFound { kind: &'static str, query: String },
    #[error("'{query}' matches multiple {kind}s: {}", candidates.join(", "))]
    Ambiguous {
        kind: &'static str,
        query: String,
        candidates: Vec<String>,
    },
    #[error("{action} failed: {detail}")]
    External { action: &'static str, detail: String },
    #[error("Not currently in a task session")]
    MissingContext,
    #[error("Task '{task}' is bound to reserved worktree '{tree}'")]
    Reserved { task: String, tree: String },
    #[error("Path '{}' does not exist", .0.display())]
    PathMissing(PathBuf),
    #[error("Invalid task name '{0}'")]
    InvalidName(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    pub fn not_found(kind: &'static str, query: impl Into<String>) -> Self {
        TaskError::NotFound {
            kind,
            query: query.into(),
        }
    }

    pub fn ambiguous(kind: &'static str, query: impl Into<String>, candidates: Vec<String>) -> Self {
        TaskError::Ambiguous {
            kind,
            query: query.into(),
            candidates,
        }
    }

    /// Wraps a provider failure, keeping the whole context chain in the message.
    pub fn external(action: &'static str, err: anyhow::Error) -> Self {
        TaskError::External {
            action,
            detail: format!("{err:#}"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound { .. })
    }
}
