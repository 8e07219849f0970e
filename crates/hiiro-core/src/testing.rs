use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::git::WorktreeProvider;
use crate::model::{Session, Tree, WindowInfo};
use crate::picker::Picker;
use crate::tmux::SessionProvider;

#[derive(Default)]
pub struct FakeGit {
    pub trees: RefCell<Vec<Tree>>,
    pub added: RefCell<Vec<PathBuf>>,
    pub moved: RefCell<Vec<(PathBuf, PathBuf)>>,
    pub fail: Cell<bool>,
    pub toplevel: Option<PathBuf>,
}

impl FakeGit {
    pub fn failing() -> Self {
        let git = Self::default();
        git.fail.set(true);
        git
    }
}

impl WorktreeProvider for FakeGit {
    fn list(&self) -> Result<Vec<Tree>> {
        Ok(self.trees.borrow().clone())
    }

    fn add_detached(&self, path: &Path) -> Result<()> {
        if self.fail.get() {
            return Err(anyhow!("git worktree add failed: fatal: boom"));
        }
        self.added.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn move_tree(&self, from: &Path, to: &Path) -> Result<()> {
        if self.fail.get() {
            return Err(anyhow!("git worktree move failed: fatal: boom"));
        }
        self.moved
            .borrow_mut()
            .push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    fn toplevel(&self, _dir: &Path) -> Result<PathBuf> {
        self.toplevel
            .clone()
            .ok_or_else(|| anyhow!("git rev-parse failed: not a git repository"))
    }
}

#[derive(Default)]
pub struct FakeSessions {
    pub current: Option<String>,
    pub existing: Vec<String>,
    pub windows: Vec<WindowInfo>,
    pub opened: RefCell<Vec<(String, Option<PathBuf>)>>,
    pub new_windows: RefCell<Vec<(String, PathBuf)>>,
    pub keys: RefCell<Vec<String>>,
}

impl FakeSessions {
    pub fn inside(current: &str) -> Self {
        Self {
            current: Some(current.to_string()),
            existing: vec![current.to_string()],
            ..Self::default()
        }
    }
}

impl SessionProvider for FakeSessions {
    fn current(&self) -> Option<Session> {
        self.current.as_deref().map(Session::new)
    }

    fn list(&self) -> Vec<Session> {
        self.existing.iter().map(Session::new).collect()
    }

    fn exists(&self, name: &str) -> bool {
        self.existing.iter().any(|existing| existing == name)
    }

    fn open(&self, name: &str, cwd: Option<&Path>) -> Result<()> {
        self.opened
            .borrow_mut()
            .push((name.to_string(), cwd.map(Path::to_path_buf)));
        Ok(())
    }

    fn new_window(&self, name: &str, cwd: &Path) -> Result<()> {
        self.new_windows
            .borrow_mut()
            .push((name.to_string(), cwd.to_path_buf()));
        Ok(())
    }

    fn send_keys(&self, text: &str) -> Result<()> {
        self.keys.borrow_mut().push(text.to_string());
        Ok(())
    }

    fn list_windows(&self, _session: &str) -> Result<Vec<WindowInfo>> {
        Ok(self.windows.clone())
    }
}

#[derive(Default)]
pub struct FakePicker {
    pub choice: Option<String>,
    pub shown: RefCell<Vec<Vec<String>>>,
}

impl FakePicker {
    pub fn choosing(choice: &str) -> Self {
        Self {
            choice: Some(choice.to_string()),
            ..Self::default()
        }
    }

    pub fn cancelling() -> Self {
        Self::default()
    }
}

impl Picker for FakePicker {
    fn select(&self, items: &[String]) -> Result<Option<String>> {
        self.shown.borrow_mut().push(items.to_vec());
        Ok(self.choice.clone())
    }
}
