use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::model::{Session, WindowInfo};

/// The terminal-multiplexer side of a task.
pub trait SessionProvider {
    /// Session the calling process runs inside, if any.
    fn current(&self) -> Option<Session>;
    fn list(&self) -> Vec<Session>;
    fn exists(&self, name: &str) -> bool;
    /// Creates the session rooted at `cwd` when missing, then switches or attaches to it.
    fn open(&self, name: &str, cwd: Option<&Path>) -> Result<()>;
    fn new_window(&self, name: &str, cwd: &Path) -> Result<()>;
    /// Types `text` followed by Enter into the current pane.
    fn send_keys(&self, text: &str) -> Result<()>;
    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>>;
}

#[derive(Debug, Default)]
pub struct Tmux;

impl Tmux {
    pub fn new() -> Self {
        Self
    }

    fn inside_tmux() -> bool {
        std::env::var_os("TMUX").is_some_and(|value| !value.is_empty())
    }
}

impl SessionProvider for Tmux {
    fn current(&self) -> Option<Session> {
        if !Self::inside_tmux() {
            return None;
        }
        let output = Command::new("tmux")
            .args(["display-message", "-p", "#S"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!name.is_empty()).then(|| Session::new(name))
    }

    fn list(&self) -> Vec<Session> {
        let output = match Command::new("tmux")
            .args(["list-sessions", "-F", "#S"])
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) if output.status.success() => output,
            Ok(_) => return Vec::new(),
            Err(err) => {
                debug!(%err, "tmux list-sessions unavailable");
                return Vec::new();
            }
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(Session::new)
            .collect()
    }

    fn exists(&self, name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", &format!("={name}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn open(&self, name: &str, cwd: Option<&Path>) -> Result<()> {
        if let Some(cwd) = cwd {
            std::env::set_current_dir(cwd)
                .with_context(|| format!("change directory to {}", cwd.display()))?;
        }
        if !self.exists(name) {
            let mut cmd = Command::new("tmux");
            cmd.args(["new-session", "-d", "-s", name]);
            if let Some(cwd) = cwd {
                cmd.arg("-c").arg(cwd);
            }
            debug!(session = name, "tmux new-session");
            let output = cmd.output().context("failed to run tmux new-session")?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("tmux new-session failed: {}", stderr.trim());
            }
        }

        let target = format!("={name}");
        let status = if Self::inside_tmux() {
            Command::new("tmux")
                .args(["switch-client", "-t", &target])
                .status()
                .context("failed to run tmux switch-client")?
        } else if std::env::var_os("NVIM").is_some() {
            bail!("can't attach to tmux inside a vim terminal; session '{name}' is ready");
        } else {
            Command::new("tmux")
                .args(["attach-session", "-t", &target])
                .status()
                .context("failed to run tmux attach-session")?
        };
        if !status.success() {
            bail!("tmux could not attach to session '{name}'");
        }
        Ok(())
    }

    fn new_window(&self, name: &str, cwd: &Path) -> Result<()> {
        let output = Command::new("tmux")
            .args(["new-window", "-n", name, "-c"])
            .arg(cwd)
            .output()
            .context("failed to run tmux new-window")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux new-window failed: {}", stderr.trim());
        }
        Ok(())
    }

    fn send_keys(&self, text: &str) -> Result<()> {
        let mut cmd = Command::new("tmux");
        cmd.arg("send-keys");
        if let Ok(pane) = std::env::var("TMUX_PANE") {
            cmd.args(["-t", &pane]);
        }
        cmd.args([text, "Enter"]);
        let status = cmd.status().context("failed to run tmux send-keys")?;
        if !status.success() {
            bail!("tmux send-keys failed");
        }
        Ok(())
    }

    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>> {
        let output = Command::new("tmux")
            .args([
                "list-windows",
                "-t",
                &format!("={session}"),
                "-F",
                "#{window_index}:#{window_name}:#{pane_current_path}",
            ])
            .output()
            .context("failed to run tmux list-windows")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux list-windows failed: {}", stderr.trim());
        }
        Ok(parse_window_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn parse_window_list(raw: &str) -> Vec<WindowInfo> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            Some(WindowInfo {
                index: parts.next()?.to_string(),
                name: parts.next()?.to_string(),
                path: parts.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}
