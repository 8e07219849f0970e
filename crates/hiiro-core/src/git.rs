use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::model::Tree;

/// The version-control side of task allocation.
pub trait WorktreeProvider {
    /// Every non-bare worktree attached to the repository.
    fn list(&self) -> Result<Vec<Tree>>;
    /// Creates a detached worktree at `path` from the repository's HEAD.
    fn add_detached(&self, path: &Path) -> Result<()>;
    /// Renames a worktree in place, keeping its checkout.
    fn move_tree(&self, from: &Path, to: &Path) -> Result<()>;
    /// Top-level directory of the checkout containing `dir`.
    fn toplevel(&self, dir: &Path) -> Result<PathBuf>;
}

/// One record of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PorcelainEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name; `None` for detached checkouts.
    pub branch: Option<String>,
    pub bare: bool,
}

/// Shells out to `git -C <repo> worktree ...`.
pub struct GitWorktrees {
    repo_path: PathBuf,
    work_dir: PathBuf,
}

impl GitWorktrees {
    pub fn new(repo_path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            work_dir: work_dir.into(),
        }
    }
}

impl WorktreeProvider for GitWorktrees {
    fn list(&self) -> Result<Vec<Tree>> {
        let mut cmd = git_command(&self.repo_path);
        cmd.args(["worktree", "list", "--porcelain"]);
        let raw = run(&mut cmd, "git worktree list")?;
        Ok(parse_worktree_porcelain(&raw)
            .into_iter()
            .filter(|entry| !entry.bare)
            .map(|entry| Tree::new(entry.path, entry.head, entry.branch, &self.work_dir))
            .collect())
    }

    fn add_detached(&self, path: &Path) -> Result<()> {
        let mut cmd = git_command(&self.repo_path);
        cmd.args(["worktree", "add", "--detach"]).arg(path);
        run(&mut cmd, "git worktree add")
            .with_context(|| format!("add worktree at {}", path.display()))?;
        Ok(())
    }

    fn move_tree(&self, from: &Path, to: &Path) -> Result<()> {
        let mut cmd = git_command(&self.repo_path);
        cmd.args(["worktree", "move"]).arg(from).arg(to);
        run(&mut cmd, "git worktree move")
            .with_context(|| format!("move worktree {} -> {}", from.display(), to.display()))?;
        Ok(())
    }

    fn toplevel(&self, dir: &Path) -> Result<PathBuf> {
        let mut cmd = git_command(dir);
        cmd.args(["rev-parse", "--show-toplevel"]);
        let raw = run(&mut cmd, "git rev-parse")?;
        Ok(PathBuf::from(raw.trim()))
    }
}

fn git_command(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir);
    cmd
}

fn run(cmd: &mut Command, what: &str) -> Result<String> {
    debug!(command = ?cmd, "{what}");
    let output = cmd.output().with_context(|| format!("run {what}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{what} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Records are separated by blank lines and open with a `worktree <path>` line.
pub fn parse_worktree_porcelain(raw: &str) -> Vec<PorcelainEntry> {
    raw.split("\n\n").filter_map(parse_record).collect()
}

fn parse_record(block: &str) -> Option<PorcelainEntry> {
    let mut lines = block.lines().map(str::trim).filter(|line| !line.is_empty());
    let path = lines.next()?.strip_prefix("worktree ")?;
    let mut entry = PorcelainEntry {
        path: PathBuf::from(path),
        head: None,
        branch: None,
        bare: false,
    };
    for line in lines {
        match line.split_once(' ') {
            Some(("HEAD", sha)) => entry.head = Some(sha.to_string()),
            Some(("branch", reference)) => {
                let short = reference.strip_prefix("refs/heads/").unwrap_or(reference);
                entry.branch = Some(short.to_string());
            }
            None if line == "bare" => entry.bare = true,
            _ => {}
        }
    }
    Some(entry)
}
