//! Read-only loaders for task layouts that predate `tasks.yml`.
//!
//! Each loader returns `None` when its layout is absent so the store can try
//! the next one. Deleting this module (and the chain in `TaskStore::new`)
//! retires the migration path.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::matcher::MAIN_SEGMENT;
use crate::model::TaskRecord;
use crate::store::StoreError;

pub trait LegacyLoader {
    fn name(&self) -> &'static str;
    fn load(&self, dir: &Path) -> Result<Option<Vec<TaskRecord>>, StoreError>;
}

/// Tried in order; the first layout present wins.
pub fn default_chain() -> Vec<Box<dyn LegacyLoader>> {
    vec![Box::new(PerTaskFiles), Box::new(TreeAssignments)]
}

/// File stem used by the per-task layout (`task_<sanitized>.yml`).
pub fn sanitize_task_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").expect("regex");
    re.replace_all(name, "_").to_string()
}

/// `task_<name>.yml` files holding `{tree?, session?, parent?}`.
pub struct PerTaskFiles;

#[derive(Debug, Default, Deserialize)]
struct PerTaskFile {
    #[serde(default)]
    tree: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    parent: Option<String>,
}

impl LegacyLoader for PerTaskFiles {
    fn name(&self) -> &'static str {
        "per-task-files"
    }

    fn load(&self, dir: &Path) -> Result<Option<Vec<TaskRecord>>, StoreError> {
        let files = task_files(dir)?;
        if files.is_empty() {
            return Ok(None);
        }
        let mut records = Vec::with_capacity(files.len());
        for (short_name, path) in files {
            let raw = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
            let data: PerTaskFile = if raw.trim().is_empty() {
                PerTaskFile::default()
            } else {
                serde_yaml::from_str(&raw).map_err(|err| StoreError::parse(&path, err))?
            };
            let parent = data
                .parent
                .clone()
                .or_else(|| inferred_parent(data.tree.as_deref(), &short_name));
            let name = match parent {
                Some(parent) => format!("{parent}/{short_name}"),
                None => short_name,
            };
            records.push(TaskRecord {
                name,
                tree: data.tree,
                session: data.session,
            });
        }
        Ok(Some(records))
    }
}

/// A `parent/child` tree path implies a subtask unless it is the parent's own checkout.
fn inferred_parent(tree: Option<&str>, short_name: &str) -> Option<String> {
    let (parent, child) = tree?.split_once('/')?;
    if child == MAIN_SEGMENT || parent == short_name {
        return None;
    }
    Some(parent.to_string())
}

fn task_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|err| StoreError::io(dir, err))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| StoreError::io(dir, err))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(short_name) = file_name
            .strip_prefix("task_")
            .and_then(|rest| rest.strip_suffix(".yml"))
        else {
            continue;
        };
        files.push((short_name.to_string(), path.clone()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// `assignments.yml`: a flat map of tree name -> task name.
pub struct TreeAssignments;

impl LegacyLoader for TreeAssignments {
    fn name(&self) -> &'static str {
        "tree-assignments"
    }

    fn load(&self, dir: &Path) -> Result<Option<Vec<TaskRecord>>, StoreError> {
        let path = dir.join("assignments.yml");
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
        if raw.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        let mapping: serde_yaml::Mapping =
            serde_yaml::from_str(&raw).map_err(|err| StoreError::parse(&path, err))?;
        let records = mapping
            .into_iter()
            .filter_map(|(tree, task)| {
                Some(TaskRecord {
                    name: task.as_str()?.to_string(),
                    tree: Some(tree.as_str()?.to_string()),
                    session: None,
                })
            })
            .collect();
        Ok(Some(records))
    }
}
