use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::environment::Environment;
use crate::error::TaskError;
use crate::git::WorktreeProvider;
use crate::matcher::MAIN_SEGMENT;

/// Tree a task named `task_name` is checked out into: `T/main` for a
/// top-level task, `P/S` for a subtask.
pub fn target_tree_name(task_name: &str) -> String {
    if task_name.contains('/') {
        task_name.to_string()
    } else {
        format!("{task_name}/{MAIN_SEGMENT}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationKind {
    /// An available tree was renamed into place.
    Reused { from: String },
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub tree_name: String,
    pub path: PathBuf,
    pub kind: AllocationKind,
}

pub struct WorktreeAllocator<'a> {
    env: &'a Environment,
    git: &'a dyn WorktreeProvider,
}

impl<'a> WorktreeAllocator<'a> {
    pub fn new(env: &'a Environment, git: &'a dyn WorktreeProvider) -> Self {
        Self { env, git }
    }

    /// Reuses an available tree when there is one, else adds a detached tree.
    pub fn allocate(&self, task_name: &str) -> Result<Allocation, TaskError> {
        let tree_name = target_tree_name(task_name);
        let path = self.env.work_dir().join(&tree_name);
        let available = self.env.available_trees();

        if let Some(tree) = available.iter().find(|tree| tree.name == tree_name) {
            info!(tree = %tree.name, "reusing tree already at target");
            return Ok(Allocation {
                tree_name,
                path: tree.path.clone(),
                kind: AllocationKind::Reused {
                    from: tree.name.clone(),
                },
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let kind = match available.first() {
            Some(tree) => {
                info!(from = %tree.name, to = %tree_name, "renaming available worktree");
                self.git
                    .move_tree(&tree.path, &path)
                    .map_err(|err| TaskError::external("rename worktree", err))?;
                AllocationKind::Reused {
                    from: tree.name.clone(),
                }
            }
            None => {
                info!(tree = %tree_name, "creating worktree");
                self.git
                    .add_detached(&path)
                    .map_err(|err| TaskError::external("create worktree", err))?;
                AllocationKind::Created
            }
        };

        Ok(Allocation {
            tree_name,
            path,
            kind,
        })
    }
}
