//! Core of hiiro: tasks bound to git worktrees and tmux sessions.

pub mod allocator;
pub mod config;
pub mod environment;
pub mod error;
pub mod git;
pub mod legacy;
pub mod manager;
pub mod matcher;
pub mod model;
pub mod picker;
pub mod report;
pub mod snapshots;
pub mod store;
pub mod tmux;

#[cfg(test)]
mod testing;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
