//! Task and subtask operations composed from the snapshot, allocator, store
//! and providers.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::{Allocation, WorktreeAllocator};
use crate::environment::Environment;
use crate::error::TaskError;
use crate::git::WorktreeProvider;
use crate::matcher::{PrefixMatcher, Resolution};
use crate::model::{Task, Tree};
use crate::picker::{select_from_pairs, Picker};
use crate::snapshots::{now_rfc3339, read_snapshot, write_snapshot, SessionSnapshot};
use crate::store::TaskStore;
use crate::tmux::SessionProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Task,
    Subtask,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Task => f.write_str("task"),
            Scope::Subtask => f.write_str("subtask"),
        }
    }
}

#[derive(Clone, Copy)]
pub struct Providers<'a> {
    pub git: &'a dyn WorktreeProvider,
    pub sessions: &'a dyn SessionProvider,
    pub picker: &'a dyn Picker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppResolution {
    NotFound,
    Ambiguous(Vec<String>),
    Resolved { name: String, path: PathBuf },
}

impl AppResolution {
    /// Turns the non-resolved shapes into the matching user-facing error.
    pub fn into_result(self, query: &str) -> Result<(String, PathBuf), TaskError> {
        match self {
            AppResolution::Resolved { name, path } => Ok((name, path)),
            AppResolution::NotFound => Err(TaskError::not_found("app", query)),
            AppResolution::Ambiguous(candidates) => {
                Err(TaskError::ambiguous("app", query, candidates))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    Branch,
    Tree,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "name", rename_all = "snake_case")]
pub enum BranchState {
    Branch(String),
    Detached,
    Unknown,
}

impl BranchState {
    fn of(tree: Option<&Tree>) -> Self {
        match tree {
            Some(Tree {
                branch: Some(branch),
                ..
            }) => BranchState::Branch(branch.clone()),
            Some(_) => BranchState::Detached,
            None => BranchState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub display_name: String,
    pub tree: Option<String>,
    pub branch: BranchState,
    pub current: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableTree {
    pub name: String,
    pub branch: BranchState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub scope: Scope,
    pub label: String,
    pub entries: Vec<ListEntry>,
    pub available: Vec<AvailableTree>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub task: String,
    pub tree: Option<String>,
    pub path: Option<PathBuf>,
    pub session: String,
    pub parent: Option<String>,
    pub last_saved: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchOutcome {
    pub task: String,
    /// Directory a new session was rooted at; `None` when one was already running.
    pub created_at: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartedTask {
    pub task: Task,
    pub allocation: Allocation,
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    AlreadyExists(SwitchOutcome),
    Started(StartedTask),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub task: String,
    pub tree: Option<String>,
    pub removed_subtasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub task: String,
    pub windows: usize,
    pub snapshot: PathBuf,
}

pub struct TaskManager<'a> {
    env: &'a Environment,
    scope: Scope,
    store: &'a TaskStore,
    providers: Providers<'a>,
}

impl<'a> TaskManager<'a> {
    pub fn new(
        env: &'a Environment,
        scope: Scope,
        store: &'a TaskStore,
        providers: Providers<'a>,
    ) -> Self {
        Self {
            env,
            scope,
            store,
            providers,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn environment(&self) -> &Environment {
        self.env
    }

    /// The parent whose subtasks subtask scope operates on.
    pub fn current_parent_task(&self) -> Option<&'a Task> {
        let task = self.env.current_task()?;
        match task.parent_name() {
            Some(parent) => self.env.task_named(parent),
            None => Some(task),
        }
    }

    /// Top-level tasks (plus subtasks whose parent is gone), or the current
    /// parent's `main` entry plus its subtasks.
    pub fn scoped_tasks(&self) -> Vec<Task> {
        match self.scope {
            Scope::Task => self
                .env
                .tasks()
                .iter()
                .filter(|task| match task.parent_name() {
                    None => true,
                    Some(parent) => self.env.task_named(parent).is_none(),
                })
                .cloned()
                .collect(),
            Scope::Subtask => {
                let Some(parent) = self.current_parent_task() else {
                    return Vec::new();
                };
                std::iter::once(Task::main_of(parent))
                    .chain(self.env.subtasks_of(&parent.name).into_iter().cloned())
                    .collect()
            }
        }
    }

    fn display_name<'t>(&self, task: &'t Task) -> &'t str {
        match self.scope {
            Scope::Task => &task.name,
            Scope::Subtask => task.short_name(),
        }
    }

    /// Maps the synthetic `parent/main` entry back to the stored parent.
    fn canonical(&self, task: &Task) -> Task {
        if task.is_main_alias() {
            if let Some(parent) = task.parent_name().and_then(|name| self.env.task_named(name)) {
                return parent.clone();
            }
        }
        task.clone()
    }

    /// Looks a task up within the scope; `parent/child` queries search every task.
    pub fn task_by_name(&self, name: &str) -> Result<Task, TaskError> {
        if name.contains('/') {
            return match self.env.find_task(name).resolution() {
                Resolution::Resolved(task) => Ok(self.canonical(task)),
                Resolution::Ambiguous(tasks) => Err(TaskError::ambiguous(
                    "task",
                    name,
                    tasks.iter().map(|task| task.name.clone()).collect(),
                )),
                Resolution::NotFound => Err(TaskError::not_found("task", name)),
            };
        }

        let tasks = self.scoped_tasks();
        let key: fn(&Task) -> &str = match self.scope {
            Scope::Task => full_name,
            Scope::Subtask => Task::short_name,
        };
        let matcher = PrefixMatcher::new(&tasks, key);
        match matcher.find(name).resolution() {
            Resolution::Resolved(task) => Ok(self.canonical(task)),
            Resolution::Ambiguous(found) => Err(TaskError::ambiguous(
                "task",
                name,
                found.into_iter().map(|task| key(task).to_string()).collect(),
            )),
            Resolution::NotFound => Err(TaskError::not_found("task", name)),
        }
    }

    fn full_name_for(&self, name: &str) -> Result<String, TaskError> {
        let segments = name.split('/').count();
        if name.is_empty() || segments > 2 || name.split('/').any(str::is_empty) {
            return Err(TaskError::InvalidName(name.to_string()));
        }
        match self.scope {
            Scope::Task => {
                if let Some((parent, _)) = name.split_once('/') {
                    if self.env.task_named(parent).is_none() {
                        return Err(TaskError::not_found("task", parent));
                    }
                }
                Ok(name.to_string())
            }
            Scope::Subtask => {
                if segments > 1 {
                    return Err(TaskError::InvalidName(name.to_string()));
                }
                let parent = self
                    .current_parent_task()
                    .ok_or(TaskError::MissingContext)?;
                Ok(format!("{}/{}", parent.name, name))
            }
        }
    }

    /// Starts `name`, or switches to it when a matching task already exists.
    pub fn start(&self, name: &str, app: Option<&str>) -> Result<StartOutcome, TaskError> {
        match self.task_by_name(name) {
            Ok(existing) => {
                info!(task = %existing.name, "task exists, switching");
                return self.switch_to(&existing, app).map(StartOutcome::AlreadyExists);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let full_name = self.full_name_for(name)?;
        let allocation = WorktreeAllocator::new(self.env, self.providers.git).allocate(&full_name)?;
        let task = Task::new(full_name, Some(allocation.tree_name.clone()), None);
        self.store.save_task(&task)?;

        let base_dir = match app {
            Some(app) => match self.resolve_app_at(app, &allocation.path) {
                AppResolution::Resolved { path, .. } => path,
                other => {
                    warn!(app, resolution = ?other, "app not resolved, opening tree root");
                    allocation.path.clone()
                }
            },
            None => allocation.path.clone(),
        };

        self.providers
            .sessions
            .open(&task.session_name, Some(&base_dir))
            .map_err(|err| TaskError::external("open session", err))?;
        Ok(StartOutcome::Started(StartedTask {
            task,
            allocation,
            base_dir,
        }))
    }

    /// Attaches to the task's session, recreating it at the tree (or app) when gone.
    pub fn switch_to(&self, task: &Task, app: Option<&str>) -> Result<SwitchOutcome, TaskError> {
        let task = self.canonical(task);
        if self.env.has_session(&task.session_name) {
            self.providers
                .sessions
                .open(&task.session_name, None)
                .map_err(|err| TaskError::external("switch session", err))?;
            return Ok(SwitchOutcome {
                task: task.name,
                created_at: None,
            });
        }

        let tree_root = self
            .env
            .tree_path_for(&task)
            .ok_or_else(|| TaskError::not_found("worktree for task", &task.name))?;
        let base_dir = match app {
            Some(app) => self.resolve_app_at(app, &tree_root).into_result(app)?.1,
            None => tree_root,
        };
        if !base_dir.is_dir() {
            return Err(TaskError::PathMissing(base_dir));
        }
        self.providers
            .sessions
            .open(&task.session_name, Some(&base_dir))
            .map_err(|err| TaskError::external("open session", err))?;
        Ok(SwitchOutcome {
            task: task.name,
            created_at: Some(base_dir),
        })
    }

    /// Switches to `name`, or to a picked task. `Ok(None)` means the pick was cancelled.
    pub fn switch(&self, name: Option<&str>, app: Option<&str>) -> Result<Option<SwitchOutcome>, TaskError> {
        let task = match name {
            Some(name) => self.task_by_name(name)?,
            None => match self.select_task_interactive()? {
                Some(task) => task,
                None => return Ok(None),
            },
        };
        self.switch_to(&task, app).map(Some)
    }

    /// Frees a task's tree for reuse, dropping its subtasks with it.
    pub fn stop_task(&self, task: &Task) -> Result<StopOutcome, TaskError> {
        let task = self.canonical(task);
        if let Some(binding) = self.env.reserved_binding(&task) {
            return Err(TaskError::Reserved {
                task: task.name,
                tree: binding.tree.clone(),
            });
        }

        let removed_subtasks: Vec<String> = if task.is_top_level() {
            self.env
                .subtasks_of(&task.name)
                .into_iter()
                .map(|sub| sub.name.clone())
                .collect()
        } else {
            Vec::new()
        };
        let mut names: Vec<&str> = vec![task.name.as_str()];
        names.extend(removed_subtasks.iter().map(String::as_str));
        if !self.store.remove_tasks(&names)? {
            debug!(task = %task.name, "task was not in the store");
        }
        info!(task = %task.name, subtasks = removed_subtasks.len(), "stopped task");

        Ok(StopOutcome {
            task: task.name,
            tree: task.tree_name,
            removed_subtasks,
        })
    }

    pub fn stop(&self, name: Option<&str>) -> Result<Option<StopOutcome>, TaskError> {
        let task = match name {
            Some(name) => self.task_by_name(name)?,
            None => match self.select_task_interactive()? {
                Some(task) => task,
                None => return Ok(None),
            },
        };
        self.stop_task(&task).map(Some)
    }

    fn is_current(&self, task: &Task) -> bool {
        let Some(current) = self.env.current_task() else {
            return false;
        };
        current.name == task.name
            || (task.is_main_alias() && task.parent_name() == Some(current.name.as_str()))
    }

    fn list_entry(&self, task: &Task, display_name: &str) -> ListEntry {
        ListEntry {
            name: task.name.clone(),
            display_name: display_name.to_string(),
            tree: task.tree_name.clone(),
            branch: BranchState::of(self.env.tree_for(task)),
            current: self.is_current(task),
            subtasks: Vec::new(),
        }
    }

    pub fn list(&self) -> Listing {
        let label = match (self.scope, self.current_parent_task()) {
            (Scope::Task, _) => "Tasks".to_string(),
            (Scope::Subtask, Some(parent)) => format!("Subtasks of '{}'", parent.name),
            (Scope::Subtask, None) => "Subtasks".to_string(),
        };

        let entries = self
            .scoped_tasks()
            .iter()
            .map(|task| {
                let mut entry = self.list_entry(task, self.display_name(task));
                if self.scope == Scope::Task {
                    entry.subtasks = self
                        .env
                        .subtasks_of(&task.name)
                        .into_iter()
                        .map(|sub| self.list_entry(sub, sub.short_name()))
                        .collect();
                }
                entry
            })
            .collect();

        let available = self
            .env
            .available_trees()
            .into_iter()
            .map(|tree| AvailableTree {
                name: tree.name.clone(),
                branch: BranchState::of(Some(tree)),
            })
            .collect();

        Listing {
            scope: self.scope,
            label,
            entries,
            available,
        }
    }

    fn current_or_missing(&self) -> Result<&'a Task, TaskError> {
        self.env.current_task().ok_or(TaskError::MissingContext)
    }

    pub fn status(&self) -> Result<StatusReport, TaskError> {
        let task = self.current_or_missing()?;
        let last_saved = read_snapshot(self.store.dir(), &task.name)?.map(|snap| snap.saved_at);
        Ok(StatusReport {
            task: task.name.clone(),
            tree: task.tree_name.clone(),
            path: self.env.tree_for(task).map(|tree| tree.path.clone()),
            session: task.session_name.clone(),
            parent: task.parent_name().map(str::to_string),
            last_saved,
        })
    }

    /// Re-persists the current task and records its window layout.
    pub fn save(&self) -> Result<SaveOutcome, TaskError> {
        let task = self.current_or_missing()?;
        let windows = self
            .providers
            .sessions
            .list_windows(&task.session_name)
            .map_err(|err| TaskError::external("capture windows", err))?;
        self.store.save_task(task)?;
        let snapshot = SessionSnapshot {
            task: task.name.clone(),
            session: task.session_name.clone(),
            saved_at: now_rfc3339(),
            windows,
        };
        let path = write_snapshot(self.store.dir(), &snapshot)?;
        Ok(SaveOutcome {
            task: task.name.clone(),
            windows: snapshot.windows.len(),
            snapshot: path,
        })
    }

    /// Configured apps first, then `name/name`, then `name`, then a
    /// prefix over the tree root's directories.
    pub fn resolve_app_at(&self, app_name: &str, tree_root: &Path) -> AppResolution {
        match self.env.find_app(app_name).resolution() {
            Resolution::Resolved(app) => {
                return AppResolution::Resolved {
                    name: app.name.clone(),
                    path: app.resolve(tree_root),
                }
            }
            Resolution::Ambiguous(apps) => {
                return AppResolution::Ambiguous(apps.iter().map(|app| app.name.clone()).collect())
            }
            Resolution::NotFound => {}
        }

        let nested = tree_root.join(app_name).join(app_name);
        if nested.is_dir() {
            return AppResolution::Resolved {
                name: app_name.to_string(),
                path: nested,
            };
        }
        let exact = tree_root.join(app_name);
        if exact.is_dir() {
            return AppResolution::Resolved {
                name: app_name.to_string(),
                path: exact,
            };
        }

        let dirs = subdirectories(tree_root);
        let matcher = PrefixMatcher::new(&dirs, |dir| dir.as_str());
        match matcher.find(app_name).resolution() {
            Resolution::Resolved(dir) => AppResolution::Resolved {
                name: dir.clone(),
                path: tree_root.join(dir),
            },
            Resolution::Ambiguous(found) => {
                AppResolution::Ambiguous(found.into_iter().cloned().collect())
            }
            Resolution::NotFound => AppResolution::NotFound,
        }
    }

    fn current_tree_root(&self) -> Result<PathBuf, TaskError> {
        let task = self.current_or_missing()?;
        self.env
            .tree_path_for(task)
            .ok_or_else(|| TaskError::not_found("worktree for task", &task.name))
    }

    /// Resolves an app against the current task's tree.
    pub fn resolve_app(&self, app_name: &str) -> Result<AppResolution, TaskError> {
        let root = self.current_tree_root()?;
        Ok(self.resolve_app_at(app_name, &root))
    }

    /// Opens an app in a new window of the current session.
    pub fn open_app(&self, app_name: Option<&str>) -> Result<Option<(String, PathBuf)>, TaskError> {
        let root = self.current_tree_root()?;
        let query = match app_name {
            Some(name) => name.to_string(),
            None => {
                let names: Vec<String> = self.env.apps().iter().map(|app| app.name.clone()).collect();
                match self.pick(&names)? {
                    Some(name) => name,
                    None => return Ok(None),
                }
            }
        };
        let (name, path) = self.resolve_app_at(&query, &root).into_result(&query)?;
        self.providers
            .sessions
            .new_window(&name, &path)
            .map_err(|err| TaskError::external("open window", err))?;
        Ok(Some((name, path)))
    }

    /// Types `cd <dir>` into the current pane; without an app, `dir` is the tree root.
    pub fn cd_to_app(&self, app_name: Option<&str>) -> Result<PathBuf, TaskError> {
        let root = self.current_tree_root()?;
        let path = match app_name.filter(|name| !name.is_empty()) {
            Some(name) => self.resolve_app_at(name, &root).into_result(name)?.1,
            None => root,
        };
        let command = format!("cd {}", shell_words::quote(&path.to_string_lossy()));
        self.providers
            .sessions
            .send_keys(&command)
            .map_err(|err| TaskError::external("send keys", err))?;
        Ok(path)
    }

    /// Path of an app (or the tree root). Outside a task the git top-level of
    /// the working directory stands in for the tree.
    pub fn app_path(&self, app_name: Option<&str>) -> Result<PathBuf, TaskError> {
        let root = match self.env.current_task() {
            Some(_) => self.current_tree_root()?,
            None => self
                .providers
                .git
                .toplevel(self.env.cwd())
                .map_err(|err| TaskError::external("find repository root", err))?,
        };
        match app_name {
            Some(name) => Ok(self.resolve_app_at(name, &root).into_result(name)?.1),
            None => Ok(root),
        }
    }

    fn field_value(&self, task: &Task, field: TaskField) -> String {
        match field {
            TaskField::Branch => match BranchState::of(self.env.tree_for(task)) {
                BranchState::Branch(branch) => branch,
                BranchState::Detached => "(detached HEAD)".to_string(),
                BranchState::Unknown => "(no branch)".to_string(),
            },
            TaskField::Tree => task.tree_name.clone().unwrap_or_default(),
            TaskField::Session => task.session_name.clone(),
        }
    }

    fn pickable_tasks(&self) -> Vec<Task> {
        let mut tasks = match self.scope {
            Scope::Task => self.env.tasks().to_vec(),
            Scope::Subtask => self.scoped_tasks(),
        };
        tasks.sort_by(|a, b| self.display_name(a).cmp(self.display_name(b)));
        tasks
    }

    /// A field of the named task, or of a picked one shown as `name | value`.
    pub fn value_for(&self, name: Option<&str>, field: TaskField) -> Result<Option<String>, TaskError> {
        if let Some(name) = name {
            let task = self.task_by_name(name)?;
            return Ok(Some(self.field_value(&task, field)));
        }
        let pairs: Vec<(String, String)> = self
            .pickable_tasks()
            .iter()
            .map(|task| {
                let value = self.field_value(task, field);
                (format!("{:<25}  | {}", self.display_name(task), value), value)
            })
            .collect();
        select_from_pairs(self.providers.picker, &pairs)
            .map_err(|err| TaskError::external("run picker", err))
    }

    fn pick(&self, items: &[String]) -> Result<Option<String>, TaskError> {
        if items.is_empty() {
            return Ok(None);
        }
        self.providers
            .picker
            .select(items)
            .map_err(|err| TaskError::external("run picker", err))
    }

    pub fn select_task_interactive(&self) -> Result<Option<Task>, TaskError> {
        let names: Vec<String> = self
            .pickable_tasks()
            .iter()
            .map(|task| self.display_name(task).to_string())
            .collect();
        match self.pick(&names)? {
            Some(choice) => self.task_by_name(&choice).map(Some),
            None => Ok(None),
        }
    }
}

fn full_name(task: &Task) -> &str {
    &task.name
}

fn subdirectories(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| !name.starts_with('.'))
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocationKind;
    use crate::config::ReservedTree;
    use crate::environment::EnvironmentParts;
    use crate::model::{App, Session, WindowInfo};
    use crate::testing::{FakeGit, FakePicker, FakeSessions};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        work: PathBuf,
        store: TaskStore,
        git: FakeGit,
        sessions: FakeSessions,
        picker: FakePicker,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().expect("tempdir");
            let work = temp.path().join("work");
            fs::create_dir_all(&work).expect("work");
            let store = TaskStore::new(temp.path().join("tasks"));
            Self {
                _temp: temp,
                work,
                store,
                git: FakeGit::default(),
                sessions: FakeSessions::default(),
                picker: FakePicker::cancelling(),
            }
        }

        fn tree(&self, name: &str, branch: Option<&str>) -> Tree {
            let path = self.work.join(name);
            fs::create_dir_all(&path).expect("tree dir");
            Tree::new(path, Some("abc".into()), branch.map(str::to_string), &self.work)
        }

        fn save(&self, name: &str, tree: &str) {
            self.store
                .save_task(&Task::new(name, Some(tree.to_string()), None))
                .expect("save");
        }

        fn env(&self, trees: Vec<Tree>, cwd: Option<&str>, session: Option<&str>) -> Environment {
            Environment::new(EnvironmentParts {
                cwd: cwd.map(|c| self.work.join(c)).unwrap_or_else(|| self.work.clone()),
                work_dir: self.work.clone(),
                tasks: self.store.load().expect("load"),
                trees,
                sessions: self.sessions.existing.iter().map(Session::new).collect(),
                current_session: session.map(Session::new),
                ..EnvironmentParts::default()
            })
        }

        fn providers(&self) -> Providers<'_> {
            Providers {
                git: &self.git,
                sessions: &self.sessions,
                picker: &self.picker,
            }
        }

        fn stored_names(&self) -> Vec<String> {
            self.store
                .load()
                .expect("load")
                .into_iter()
                .map(|task| task.name)
                .collect()
        }
    }

    #[test]
    fn start_reuses_available_tree_and_persists_task() {
        let fx = Fixture::new();
        fx.save("foo", "b");
        let env = fx.env(vec![fx.tree("a", None), fx.tree("b", None)], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        let outcome = manager.start("bar", None).expect("start");
        let StartOutcome::Started(started) = outcome else {
            panic!("expected a fresh start");
        };
        assert_eq!(started.allocation.kind, AllocationKind::Reused { from: "a".into() });
        assert_eq!(started.task.tree_name.as_deref(), Some("bar/main"));
        assert_eq!(started.task.session_name, "bar");
        assert_eq!(started.base_dir, fx.work.join("bar/main"));

        let stored = fx.store.load().expect("load");
        let bar = stored.iter().find(|t| t.name == "bar").expect("bar stored");
        assert_eq!(bar.to_record().tree.as_deref(), Some("bar/main"));
        assert_eq!(bar.to_record().session, None);
        assert_eq!(
            fx.sessions.opened.borrow().as_slice(),
            &[("bar".to_string(), Some(fx.work.join("bar/main")))]
        );
    }

    #[test]
    fn start_creates_tree_when_none_available() {
        let fx = Fixture::new();
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let StartOutcome::Started(started) = manager.start("x", None).expect("start") else {
            panic!("expected a fresh start");
        };
        assert_eq!(started.allocation.kind, AllocationKind::Created);
        assert_eq!(fx.git.added.borrow().as_slice(), &[fx.work.join("x/main")]);
    }

    #[test]
    fn second_start_switches_instead_of_allocating() {
        let fx = Fixture::new();
        fx.save("x", "x/main");
        let env = fx.env(vec![fx.tree("x/main", None), fx.tree("spare", None)], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        let outcome = manager.start("x", None).expect("start");
        assert_eq!(
            outcome,
            StartOutcome::AlreadyExists(SwitchOutcome {
                task: "x".into(),
                created_at: Some(fx.work.join("x/main")),
            })
        );
        assert!(fx.git.added.borrow().is_empty());
        assert!(fx.git.moved.borrow().is_empty());
        assert_eq!(fx.stored_names(), vec!["x"]);
    }

    #[test]
    fn failed_allocation_persists_nothing() {
        let mut fx = Fixture::new();
        fx.git = FakeGit::failing();
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let err = manager.start("bar", None).expect_err("fails");
        assert!(matches!(err, TaskError::External { .. }));
        assert!(fx.stored_names().is_empty());
        assert!(fx.sessions.opened.borrow().is_empty());
    }

    #[test]
    fn start_with_ambiguous_name_reports_candidates() {
        let fx = Fixture::new();
        fx.save("billing", "billing/main");
        fx.save("bills", "bills/main");
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let err = manager.start("bil", None).expect_err("ambiguous");
        assert_eq!(err.to_string(), "'bil' matches multiple tasks: billing, bills");
    }

    #[test]
    fn subtask_start_needs_a_current_task() {
        let fx = Fixture::new();
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Subtask, &fx.store, fx.providers());
        assert!(matches!(
            manager.start("api", None),
            Err(TaskError::MissingContext)
        ));
    }

    #[test]
    fn subtask_start_lands_in_parent_namespace() {
        let mut fx = Fixture::new();
        fx.save("proj", "proj/main");
        fx.sessions = FakeSessions::inside("proj");
        let env = fx.env(vec![fx.tree("proj/main", None)], None, Some("proj"));
        let manager = TaskManager::new(&env, Scope::Subtask, &fx.store, fx.providers());
        let StartOutcome::Started(started) = manager.start("api", None).expect("start") else {
            panic!("expected a fresh start");
        };
        assert_eq!(started.task.name, "proj/api");
        assert_eq!(started.allocation.tree_name, "proj/api");
        assert_eq!(fx.stored_names(), vec!["proj", "proj/api"]);
    }

    #[test]
    fn task_scope_subtask_requires_existing_parent() {
        let fx = Fixture::new();
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let err = manager.start("nope/api", None).expect_err("no parent");
        assert_eq!(err.to_string(), "task 'nope' not found");
        assert!(matches!(
            manager.start("a/b/c", None),
            Err(TaskError::InvalidName(_))
        ));
    }

    #[test]
    fn switch_attaches_to_running_session() {
        let mut fx = Fixture::new();
        fx.save("foo", "foo/main");
        fx.sessions.existing = vec!["foo".into()];
        let env = fx.env(vec![fx.tree("foo/main", None)], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let outcome = manager.switch(Some("f"), None).expect("switch");
        assert_eq!(
            outcome,
            Some(SwitchOutcome {
                task: "foo".into(),
                created_at: None,
            })
        );
        assert_eq!(
            fx.sessions.opened.borrow().as_slice(),
            &[("foo".to_string(), None)]
        );
    }

    #[test]
    fn switch_reports_missing_tree_path() {
        let fx = Fixture::new();
        fx.save("ghost", "ghost/main");
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let err = manager.switch(Some("ghost"), None).expect_err("missing");
        assert!(matches!(err, TaskError::PathMissing(path) if path == fx.work.join("ghost/main")));
        assert!(fx.sessions.opened.borrow().is_empty());
    }

    #[test]
    fn cancelled_pick_is_a_no_op() {
        let fx = Fixture::new();
        fx.save("foo", "foo/main");
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        assert_eq!(manager.stop(None).expect("stop"), None);
        assert_eq!(manager.switch(None, None).expect("switch"), None);
        assert_eq!(fx.stored_names(), vec!["foo"]);
        assert_eq!(fx.picker.shown.borrow()[0], vec!["foo".to_string()]);
    }

    #[test]
    fn picked_task_is_stopped() {
        let mut fx = Fixture::new();
        fx.save("foo", "foo/main");
        fx.save("bar", "bar/main");
        fx.picker = FakePicker::choosing("foo");
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let outcome = manager.stop(None).expect("stop").expect("picked");
        assert_eq!(outcome.task, "foo");
        assert_eq!(fx.stored_names(), vec!["bar"]);
        assert_eq!(
            fx.picker.shown.borrow()[0],
            vec!["bar".to_string(), "foo".to_string()]
        );
    }

    #[test]
    fn stop_parent_removes_subtasks_and_frees_tree() {
        let fx = Fixture::new();
        fx.save("proj", "proj/main");
        fx.save("proj/api", "proj/api");
        fx.save("other", "other/main");
        let env = fx.env(vec![fx.tree("proj/main", None)], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let outcome = manager.stop(Some("proj")).expect("stop").expect("stopped");
        assert_eq!(outcome.removed_subtasks, vec!["proj/api".to_string()]);
        assert_eq!(outcome.tree.as_deref(), Some("proj/main"));
        assert_eq!(fx.stored_names(), vec!["other"]);
        assert!(fx.work.join("proj/main").is_dir());
    }

    #[test]
    fn stop_refuses_reserved_tree() {
        let fx = Fixture::new();
        let env = Environment::new(EnvironmentParts {
            cwd: fx.work.clone(),
            work_dir: fx.work.clone(),
            trees: vec![fx.tree("carrot", Some("master"))],
            reserved: vec![ReservedTree {
                tree: "carrot".into(),
                task: "master".into(),
            }],
            ..EnvironmentParts::default()
        });
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let err = manager.stop(Some("master")).expect_err("reserved");
        assert_eq!(
            err.to_string(),
            "Task 'master' is bound to reserved worktree 'carrot'"
        );
    }

    #[test]
    fn subtask_main_alias_resolves_to_parent() {
        let mut fx = Fixture::new();
        fx.save("proj", "proj/main");
        fx.save("proj/api", "proj/api");
        fx.sessions = FakeSessions::inside("proj/api");
        let env = fx.env(
            vec![fx.tree("proj/main", None), fx.tree("proj/api", None)],
            None,
            Some("proj/api"),
        );
        let manager = TaskManager::new(&env, Scope::Subtask, &fx.store, fx.providers());
        let names: Vec<String> = manager.scoped_tasks().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["proj/main", "proj/api"]);
        assert_eq!(manager.task_by_name("main").expect("main").name, "proj");
        assert_eq!(manager.task_by_name("a").expect("api").name, "proj/api");
        assert_eq!(manager.task_by_name("proj/main").expect("path").name, "proj");
    }

    #[test]
    fn list_nests_subtasks_and_shows_available_trees() {
        let fx = Fixture::new();
        fx.save("proj", "proj/main");
        fx.save("proj/api", "proj/api");
        let env = fx.env(
            vec![
                fx.tree("proj/main", Some("feature/proj")),
                fx.tree("proj/api", None),
                fx.tree("spare", Some("old")),
            ],
            Some("proj/api/src"),
            None,
        );
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let listing = manager.list();
        assert_eq!(listing.label, "Tasks");
        assert_eq!(listing.entries.len(), 1);
        let proj = &listing.entries[0];
        assert_eq!(proj.branch, BranchState::Branch("feature/proj".into()));
        assert!(!proj.current);
        assert_eq!(proj.subtasks.len(), 1);
        assert_eq!(proj.subtasks[0].display_name, "api");
        assert_eq!(proj.subtasks[0].branch, BranchState::Detached);
        assert!(proj.subtasks[0].current);
        assert_eq!(listing.available.len(), 1);
        assert_eq!(listing.available[0].name, "spare");
    }

    #[test]
    fn orphaned_subtask_is_listed_at_top_level() {
        let fx = Fixture::new();
        fx.save("shop/web", "shop/web");
        fx.save("other", "other/main");
        let env = fx.env(
            vec![fx.tree("shop/web", Some("web")), fx.tree("other/main", None)],
            None,
            None,
        );
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let listing = manager.list();
        let names: Vec<&str> = listing
            .entries
            .iter()
            .map(|entry| entry.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["shop/web", "other"]);
        assert_eq!(listing.entries[0].branch, BranchState::Branch("web".into()));
        assert!(listing.available.is_empty());
        assert_eq!(manager.task_by_name("sh").expect("orphan").name, "shop/web");
    }

    #[test]
    fn stale_tree_name_does_not_bind_by_prefix() {
        let fx = Fixture::new();
        fx.save("foo", "wt-1");
        let env = fx.env(vec![fx.tree("wt-10", Some("other"))], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        let branch = manager.value_for(Some("foo"), TaskField::Branch).expect("branch");
        assert_eq!(branch.as_deref(), Some("(no branch)"));
        let listing = manager.list();
        assert_eq!(listing.entries[0].branch, BranchState::Unknown);
        assert_eq!(listing.available[0].name, "wt-10");

        let err = manager.switch(Some("foo"), None).expect_err("tree gone");
        assert!(matches!(err, TaskError::PathMissing(path) if path == fx.work.join("wt-1")));
        assert!(fx.sessions.opened.borrow().is_empty());
    }

    #[test]
    fn start_roots_session_in_configured_app() {
        let fx = Fixture::new();
        let env = Environment::new(EnvironmentParts {
            cwd: fx.work.clone(),
            work_dir: fx.work.clone(),
            apps: vec![App::new("web", "apps/web")],
            ..EnvironmentParts::default()
        });
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let StartOutcome::Started(started) = manager.start("bar", Some("we")).expect("start") else {
            panic!("expected a fresh start");
        };
        assert_eq!(started.base_dir, fx.work.join("bar/main/apps/web"));
        assert_eq!(
            fx.sessions.opened.borrow().as_slice(),
            &[("bar".to_string(), Some(fx.work.join("bar/main/apps/web")))]
        );
    }

    #[test]
    fn start_with_unknown_app_opens_tree_root() {
        let fx = Fixture::new();
        let env = fx.env(vec![fx.tree("spare", None)], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let StartOutcome::Started(started) = manager.start("bar", Some("nope")).expect("start") else {
            panic!("expected a fresh start");
        };
        assert_eq!(started.base_dir, fx.work.join("bar/main"));
        assert_eq!(fx.stored_names(), vec!["bar"]);
        assert_eq!(
            fx.sessions.opened.borrow().as_slice(),
            &[("bar".to_string(), Some(fx.work.join("bar/main")))]
        );
    }

    #[test]
    fn switch_with_app_roots_new_session_there() {
        let fx = Fixture::new();
        fx.save("foo", "foo/main");
        let tree = fx.tree("foo/main", None);
        fs::create_dir_all(fx.work.join("foo/main/api/api")).expect("nested app");
        let env = fx.env(vec![tree], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        let err = manager.switch(Some("foo"), Some("zzz")).expect_err("unknown app");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "app 'zzz' not found");
        assert!(fx.sessions.opened.borrow().is_empty());

        let outcome = manager.switch(Some("foo"), Some("api")).expect("switch");
        assert_eq!(
            outcome.and_then(|switched| switched.created_at),
            Some(fx.work.join("foo/main/api/api"))
        );
    }

    #[test]
    fn listing_serializes_branch_state() {
        let fx = Fixture::new();
        fx.save("foo", "foo/main");
        let env = fx.env(vec![fx.tree("foo/main", Some("feat")), fx.tree("spare", None)], None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let json = serde_json::to_value(manager.list()).expect("json");
        assert_eq!(json["scope"], "task");
        assert_eq!(json["entries"][0]["branch"]["state"], "branch");
        assert_eq!(json["entries"][0]["branch"]["name"], "feat");
        assert_eq!(json["available"][0]["branch"]["state"], "detached");
        assert!(json["entries"][0].get("subtasks").is_none());
    }

    #[test]
    fn subtask_list_starts_with_main_entry() {
        let fx = Fixture::new();
        fx.save("proj", "proj/main");
        fx.save("proj/api", "proj/api");
        let env = fx.env(vec![fx.tree("proj/main", None)], Some("proj/main"), None);
        let manager = TaskManager::new(&env, Scope::Subtask, &fx.store, fx.providers());
        let listing = manager.list();
        assert_eq!(listing.label, "Subtasks of 'proj'");
        let names: Vec<&str> = listing
            .entries
            .iter()
            .map(|entry| entry.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["main", "api"]);
        assert!(listing.entries[0].current);
        assert_eq!(listing.entries[1].branch, BranchState::Unknown);
    }

    #[test]
    fn status_and_save_need_context() {
        let fx = Fixture::new();
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        assert!(matches!(manager.status(), Err(TaskError::MissingContext)));
        assert!(matches!(manager.save(), Err(TaskError::MissingContext)));
    }

    #[test]
    fn save_writes_snapshot_read_back_by_status() {
        let mut fx = Fixture::new();
        fx.save("foo", "foo/main");
        fx.sessions = FakeSessions::inside("foo");
        fx.sessions.windows = vec![WindowInfo {
            index: "1".into(),
            name: "editor".into(),
            path: "/w/foo/main".into(),
        }];
        let env = fx.env(vec![fx.tree("foo/main", None)], None, Some("foo"));
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        let saved = manager.save().expect("save");
        assert_eq!(saved.windows, 1);
        assert!(saved.snapshot.is_file());

        let status = manager.status().expect("status");
        assert_eq!(status.task, "foo");
        assert_eq!(status.path, Some(fx.work.join("foo/main")));
        assert!(status.last_saved.is_some());
        assert_eq!(status.parent, None);
    }

    #[test]
    fn nested_app_directory_wins_without_configuration() {
        let mut fx = Fixture::new();
        fx.save("taskX", "taskX");
        fx.sessions = FakeSessions::inside("taskX");
        let tree = fx.tree("taskX", None);
        fs::create_dir_all(fx.work.join("taskX/billing/billing")).expect("nested");
        let env = fx.env(vec![tree], None, Some("taskX"));
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        assert_eq!(
            manager.resolve_app("billing").expect("resolve"),
            AppResolution::Resolved {
                name: "billing".into(),
                path: fx.work.join("taskX/billing/billing"),
            }
        );
        let opened = manager.open_app(Some("billing")).expect("open").expect("opened");
        assert_eq!(opened.1, fx.work.join("taskX/billing/billing"));
        assert_eq!(
            fx.sessions.new_windows.borrow().as_slice(),
            &[("billing".to_string(), fx.work.join("taskX/billing/billing"))]
        );
    }

    #[test]
    fn app_resolution_falls_back_to_directory_prefix() {
        let mut fx = Fixture::new();
        fx.save("t", "t/main");
        fx.sessions = FakeSessions::inside("t");
        let tree = fx.tree("t/main", None);
        for dir in ["admin", "api", "apps", ".git"] {
            fs::create_dir_all(fx.work.join("t/main").join(dir)).expect("dir");
        }
        let env = fx.env(vec![tree], None, Some("t"));
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        assert_eq!(
            manager.resolve_app("ad").expect("resolve"),
            AppResolution::Resolved {
                name: "admin".into(),
                path: fx.work.join("t/main/admin"),
            }
        );
        assert_eq!(
            manager.resolve_app("ap").expect("resolve"),
            AppResolution::Ambiguous(vec!["api".into(), "apps".into()])
        );
        assert_eq!(manager.resolve_app("zzz").expect("resolve"), AppResolution::NotFound);
        let err = manager.cd_to_app(Some("zzz")).expect_err("missing app");
        assert_eq!(err.to_string(), "app 'zzz' not found");
    }

    #[test]
    fn configured_apps_take_precedence() {
        let mut fx = Fixture::new();
        fx.save("t", "t/main");
        fx.sessions = FakeSessions::inside("t");
        let tree = fx.tree("t/main", None);
        fs::create_dir_all(fx.work.join("t/main/web/web")).expect("nested");
        let env = Environment::new(EnvironmentParts {
            cwd: fx.work.clone(),
            work_dir: fx.work.clone(),
            tasks: fx.store.load().expect("load"),
            trees: vec![tree],
            apps: vec![App::new("web", "apps/frontend"), App::new("worker", "svc/worker")],
            current_session: Some(Session::new("t")),
            ..EnvironmentParts::default()
        });
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        assert_eq!(
            manager.resolve_app("web").expect("resolve"),
            AppResolution::Resolved {
                name: "web".into(),
                path: fx.work.join("t/main/apps/frontend"),
            }
        );
        assert_eq!(
            manager.resolve_app("w").expect("resolve"),
            AppResolution::Ambiguous(vec!["web".into(), "worker".into()])
        );
    }

    #[test]
    fn cd_without_app_sends_tree_root() {
        let mut fx = Fixture::new();
        fx.save("foo", "foo/main");
        fx.sessions = FakeSessions::inside("foo");
        let env = fx.env(vec![fx.tree("foo/main", None)], None, Some("foo"));
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        let path = manager.cd_to_app(None).expect("cd");
        assert_eq!(path, fx.work.join("foo/main"));
        let sent = fx.sessions.keys.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("cd "));
        assert!(sent[0].ends_with("foo/main"));
    }

    #[test]
    fn app_path_outside_task_uses_git_toplevel() {
        let mut fx = Fixture::new();
        fx.git.toplevel = Some(fx.work.join("checkout"));
        let env = fx.env(Vec::new(), None, None);
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());
        assert_eq!(manager.app_path(None).expect("path"), fx.work.join("checkout"));
    }

    #[test]
    fn value_lookups_by_name_and_picker() {
        let mut fx = Fixture::new();
        fx.save("foo", "foo/main");
        fx.save("bar", "bar/main");
        fx.save("ghost", "ghost/main");
        fx.picker = FakePicker::choosing(&format!("{:<25}  | {}", "foo", "feature/foo"));
        let env = fx.env(
            vec![fx.tree("foo/main", Some("feature/foo")), fx.tree("bar/main", None)],
            None,
            None,
        );
        let manager = TaskManager::new(&env, Scope::Task, &fx.store, fx.providers());

        let value = |name, field| manager.value_for(Some(name), field).expect("value");
        assert_eq!(value("foo", TaskField::Branch).as_deref(), Some("feature/foo"));
        assert_eq!(value("bar", TaskField::Branch).as_deref(), Some("(detached HEAD)"));
        assert_eq!(value("gh", TaskField::Branch).as_deref(), Some("(no branch)"));
        assert_eq!(value("bar", TaskField::Tree).as_deref(), Some("bar/main"));
        assert_eq!(value("bar", TaskField::Session).as_deref(), Some("bar"));

        let picked = manager.value_for(None, TaskField::Branch).expect("picked");
        assert_eq!(picked.as_deref(), Some("feature/foo"));
        assert_eq!(fx.picker.shown.borrow()[0].len(), 3);
    }
}
