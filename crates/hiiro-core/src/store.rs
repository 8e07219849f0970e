use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::legacy::{self, LegacyLoader};
use crate::model::{Task, TaskRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task store IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to serialize task store: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path, source: serde_yaml::Error) -> Self {
        StoreError::Parse {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDocument {
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

/// Flat, ordered task list persisted as `tasks.yml` inside the tasks dir.
pub struct TaskStore {
    dir: PathBuf,
    legacy: Vec<Box<dyn LegacyLoader>>,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            legacy: legacy::default_chain(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("tasks.yml")
    }

    pub fn load(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.load_document()?.tasks.into_iter().map(Task::from).collect())
    }

    /// Reads the canonical file, or migrates the first legacy layout found.
    pub fn load_document(&self) -> Result<TaskDocument, StoreError> {
        let path = self.path();
        if path.exists() {
            return read_document(&path);
        }
        for loader in &self.legacy {
            if let Some(tasks) = loader.load(&self.dir)? {
                info!(
                    loader = loader.name(),
                    count = tasks.len(),
                    "migrating legacy task layout"
                );
                let document = TaskDocument { tasks };
                self.write(&document)?;
                return Ok(document);
            }
        }
        Ok(TaskDocument::default())
    }

    /// Replaces any record with the same name and appends the new one.
    pub fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut document = self.load_document()?;
        document.tasks.retain(|record| record.name != task.name);
        document.tasks.push(task.to_record());
        self.write(&document)
    }

    pub fn remove_task(&self, name: &str) -> Result<bool, StoreError> {
        self.remove_tasks(&[name])
    }

    /// Removes every named record in a single write.
    pub fn remove_tasks(&self, names: &[&str]) -> Result<bool, StoreError> {
        let mut document = self.load_document()?;
        let before = document.tasks.len();
        document
            .tasks
            .retain(|record| !names.contains(&record.name.as_str()));
        if document.tasks.len() == before {
            return Ok(false);
        }
        self.write(&document)?;
        Ok(true)
    }

    fn write(&self, document: &TaskDocument) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|err| StoreError::io(&self.dir, err))?;
        let path = self.path();
        let tmp = path.with_extension("yml.tmp");
        let body = serde_yaml::to_string(document).map_err(StoreError::Serialize)?;
        fs::write(&tmp, body).map_err(|err| StoreError::io(&tmp, err))?;
        fs::rename(&tmp, &path).map_err(|err| StoreError::io(&path, err))?;
        debug!(path = %path.display(), count = document.tasks.len(), "wrote task store");
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<TaskDocument, StoreError> {
    let raw = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    if raw.trim().is_empty() {
        return Ok(TaskDocument::default());
    }
    serde_yaml::from_str(&raw).map_err(|err| StoreError::parse(path, err))
}
