use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::matcher::MAIN_SEGMENT;

/// Persisted shape of a task; `session` is omitted when it equals `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub name: String,
    pub tree_name: Option<String>,
    pub session_name: String,
}

impl Task {
    pub fn new(name: impl Into<String>, tree: Option<String>, session: Option<String>) -> Self {
        let name = name.into();
        let session_name = session.unwrap_or_else(|| name.clone());
        Self {
            name,
            tree_name: tree,
            session_name,
        }
    }

    /// The `parent/main` stand-in listed first in subtask scope.
    pub fn main_of(parent: &Task) -> Self {
        Self {
            name: format!("{}/{}", parent.name, MAIN_SEGMENT),
            tree_name: parent.tree_name.clone(),
            session_name: parent.session_name.clone(),
        }
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.name.split_once('/').map(|(parent, _)| parent)
    }

    pub fn short_name(&self) -> &str {
        self.name
            .split_once('/')
            .map(|(_, child)| child)
            .unwrap_or(&self.name)
    }

    pub fn is_subtask(&self) -> bool {
        self.name.contains('/')
    }

    pub fn is_top_level(&self) -> bool {
        !self.is_subtask()
    }

    pub fn is_main_alias(&self) -> bool {
        self.is_subtask() && self.short_name() == MAIN_SEGMENT
    }

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            name: self.name.clone(),
            tree: self.tree_name.clone(),
            session: (self.session_name != self.name).then(|| self.session_name.clone()),
        }
    }
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        Task::new(record.name, record.tree, record.session)
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Task {}

/// A checkout reported by the worktree provider.
#[derive(Debug, Clone, Serialize)]
pub struct Tree {
    pub name: String,
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
}

impl Tree {
    pub fn new(path: PathBuf, head: Option<String>, branch: Option<String>, work_dir: &Path) -> Self {
        Self {
            name: tree_name_for(&path, work_dir),
            path,
            head,
            branch,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.branch.is_none()
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Tree {}

/// Name of a tree: its path relative to the work dir, else its basename.
pub fn tree_name_for(path: &Path, work_dir: &Path) -> String {
    match path.strip_prefix(work_dir) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct App {
    pub name: String,
    pub relative_path: PathBuf,
}

impl App {
    pub fn new(name: impl Into<String>, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            relative_path: relative_path.into(),
        }
    }

    pub fn resolve(&self, tree_root: &Path) -> PathBuf {
        tree_root.join(&self.relative_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub name: String,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One tmux window as captured by `save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub index: String,
    pub name: String,
    pub path: String,
}
