//! One consistent view of tasks, trees, sessions and apps per invocation.
//!
//! Built once and passed by reference; nothing here re-queries git or tmux,
//! so every decision an operation makes sees the same state.

use std::path::{Path, PathBuf};

use crate::config::{load_apps, ReservedTree, Settings};
use crate::error::TaskError;
use crate::git::WorktreeProvider;
use crate::matcher::{MatchResult, PrefixMatcher};
use crate::model::{App, Session, Task, Tree};
use crate::store::TaskStore;
use crate::tmux::SessionProvider;

#[derive(Debug, Default)]
pub struct EnvironmentParts {
    pub cwd: PathBuf,
    pub work_dir: PathBuf,
    pub tasks: Vec<Task>,
    pub trees: Vec<Tree>,
    pub sessions: Vec<Session>,
    pub apps: Vec<App>,
    pub current_session: Option<Session>,
    pub reserved: Vec<ReservedTree>,
}

#[derive(Debug)]
pub struct Environment {
    cwd: PathBuf,
    work_dir: PathBuf,
    tasks: Vec<Task>,
    trees: Vec<Tree>,
    sessions: Vec<Session>,
    apps: Vec<App>,
    current_session: Option<Session>,
    current_tree: Option<usize>,
    current_task: Option<usize>,
    reserved: Vec<ReservedTree>,
}

impl Environment {
    pub fn new(parts: EnvironmentParts) -> Self {
        let EnvironmentParts {
            cwd,
            work_dir,
            mut tasks,
            trees,
            sessions,
            apps,
            current_session,
            reserved,
        } = parts;

        // Reserved bindings count as tasks even when the store has never seen them.
        for binding in &reserved {
            let bound = tasks.iter().any(|task| {
                task.name == binding.task || task.tree_name.as_deref() == Some(binding.tree.as_str())
            });
            if !bound {
                tasks.push(Task::new(binding.task.clone(), Some(binding.tree.clone()), None));
            }
        }

        let current_tree = trees
            .iter()
            .enumerate()
            .filter(|(_, tree)| tree.contains(&cwd))
            .max_by_key(|(_, tree)| tree.path.components().count())
            .map(|(idx, _)| idx);

        let current_task = current_session
            .as_ref()
            .and_then(|session| {
                tasks
                    .iter()
                    .position(|task| task.session_name == session.name)
            })
            .or_else(|| {
                let tree = &trees[current_tree?];
                tasks
                    .iter()
                    .position(|task| task.tree_name.as_deref() == Some(tree.name.as_str()))
            });

        Self {
            cwd,
            work_dir,
            tasks,
            trees,
            sessions,
            apps,
            current_session,
            current_tree,
            current_task,
            reserved,
        }
    }

    /// Reads the store, the worktree list, tmux sessions and the app config.
    pub fn capture(
        settings: &Settings,
        store: &TaskStore,
        git: &dyn WorktreeProvider,
        sessions: &dyn SessionProvider,
    ) -> Result<Self, TaskError> {
        let cwd = std::env::current_dir()?;
        let tasks = store.load()?;
        let trees = git
            .list()
            .map_err(|err| TaskError::external("list worktrees", err))?;
        let apps = load_apps(&settings.apps_path())?;
        Ok(Self::new(EnvironmentParts {
            cwd,
            work_dir: settings.work_dir.clone(),
            tasks,
            trees,
            sessions: sessions.list(),
            apps,
            current_session: sessions.current(),
            reserved: settings.reserved.clone(),
        }))
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session.as_ref()
    }

    pub fn current_tree(&self) -> Option<&Tree> {
        self.current_tree.map(|idx| &self.trees[idx])
    }

    /// The task whose session or tree matches where this process runs.
    pub fn current_task(&self) -> Option<&Task> {
        self.current_task.map(|idx| &self.tasks[idx])
    }

    pub fn task_matcher(&self) -> PrefixMatcher<'_, Task> {
        PrefixMatcher::new(&self.tasks, |task| task.name.as_str())
    }

    pub fn tree_matcher(&self) -> PrefixMatcher<'_, Tree> {
        PrefixMatcher::new(&self.trees, |tree| tree.name.as_str())
    }

    pub fn session_matcher(&self) -> PrefixMatcher<'_, Session> {
        PrefixMatcher::new(&self.sessions, |session| session.name.as_str())
    }

    pub fn app_matcher(&self) -> PrefixMatcher<'_, App> {
        PrefixMatcher::new(&self.apps, |app| app.name.as_str())
    }

    /// Looks a task up by name, accepting `parent/child` abbreviations.
    pub fn find_task(&self, query: &str) -> MatchResult<'_, Task> {
        if query.contains('/') {
            self.task_matcher().resolve_path(query)
        } else {
            self.task_matcher().find(query)
        }
    }

    pub fn find_tree(&self, query: &str) -> MatchResult<'_, Tree> {
        self.tree_matcher().find(query)
    }

    pub fn find_session(&self, query: &str) -> MatchResult<'_, Session> {
        self.session_matcher().find(query)
    }

    pub fn find_app(&self, query: &str) -> MatchResult<'_, App> {
        self.app_matcher().find(query)
    }

    pub fn task_by_tree(&self, tree_name: &str) -> Option<&Task> {
        self.task_matcher()
            .resolve(tree_name, |task| task.tree_name.as_deref())
            .matched()
    }

    pub fn task_by_session(&self, session_name: &str) -> Option<&Task> {
        self.task_matcher()
            .resolve(session_name, |task| Some(task.session_name.as_str()))
            .matched()
    }

    pub fn task_named(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.name == name)
    }

    pub fn subtasks_of(&self, parent: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.parent_name() == Some(parent))
            .collect()
    }

    /// The tree a task is bound to. Stored names bind exactly, never by prefix.
    pub fn tree_for(&self, task: &Task) -> Option<&Tree> {
        let name = task.tree_name.as_deref()?;
        self.trees.iter().find(|tree| tree.name == name)
    }

    /// Where a task's checkout lives, even if git no longer lists it.
    pub fn tree_path_for(&self, task: &Task) -> Option<PathBuf> {
        if let Some(tree) = self.tree_for(task) {
            return Some(tree.path.clone());
        }
        task.tree_name
            .as_deref()
            .map(|name| self.work_dir.join(name))
    }

    pub fn has_session(&self, name: &str) -> bool {
        self.sessions.iter().any(|session| session.name == name)
    }

    pub fn is_reserved_tree(&self, tree_name: &str) -> bool {
        self.reserved.iter().any(|binding| binding.tree == tree_name)
    }

    /// The reserved tree a task is pinned to, by tree or by task name.
    pub fn reserved_binding(&self, task: &Task) -> Option<&ReservedTree> {
        self.reserved.iter().find(|binding| {
            binding.task == task.name || task.tree_name.as_deref() == Some(binding.tree.as_str())
        })
    }

    pub fn is_tree_assigned(&self, tree: &Tree) -> bool {
        self.tasks
            .iter()
            .any(|task| task.tree_name.as_deref() == Some(tree.name.as_str()))
    }

    /// Trees free for reuse: unassigned and not reserved, in provider order.
    pub fn available_trees(&self) -> Vec<&Tree> {
        self.trees
            .iter()
            .filter(|tree| !self.is_tree_assigned(tree) && !self.is_reserved_tree(&tree.name))
            .collect()
    }
}
