use std::fmt::Write as _;
use std::path::Path;

use crate::manager::{BranchState, ListEntry, Listing, Scope, StatusReport};
use crate::model::App;

fn branch_suffix(branch: &BranchState) -> String {
    match branch {
        BranchState::Branch(name) => format!("  [{name}]"),
        BranchState::Detached => "  [(detached)]".to_string(),
        BranchState::Unknown => String::new(),
    }
}

fn marker(entry: &ListEntry) -> &'static str {
    if entry.current {
        "*"
    } else {
        " "
    }
}

pub fn render_listing(listing: &Listing) -> String {
    let mut out = String::new();
    if listing.entries.is_empty() {
        let what = match listing.scope {
            Scope::Task => "tasks",
            Scope::Subtask => "subtasks",
        };
        let _ = writeln!(out, "No {what} found");
        let _ = writeln!(out, "Use 'h {} start NAME' to create one.", listing.scope);
        return out;
    }

    let _ = writeln!(out, "{}:", listing.label);
    let _ = writeln!(out);
    for entry in &listing.entries {
        let _ = writeln!(
            out,
            "{} {:<25}  tree: {:<20}{}",
            marker(entry),
            entry.display_name,
            entry.tree.as_deref().unwrap_or("(none)"),
            branch_suffix(&entry.branch)
        );
        for sub in &entry.subtasks {
            let _ = writeln!(
                out,
                "{} - {:<23}  tree: {:<20}{}",
                marker(sub),
                sub.display_name,
                sub.tree.as_deref().unwrap_or("(none)"),
                branch_suffix(&sub.branch)
            );
        }
    }

    if !listing.available.is_empty() {
        let _ = writeln!(out);
        for tree in &listing.available {
            let _ = writeln!(
                out,
                "  {:<25}  (available){}",
                tree.name,
                branch_suffix(&tree.branch)
            );
        }
    }
    out
}

pub fn render_status(status: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Task: {}", status.task);
    let _ = writeln!(out, "Worktree: {}", status.tree.as_deref().unwrap_or("(none)"));
    let path = status
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(unknown)".to_string());
    let _ = writeln!(out, "Path: {path}");
    let _ = writeln!(out, "Session: {}", status.session);
    if let Some(parent) = &status.parent {
        let _ = writeln!(out, "Parent: {parent}");
    }
    if let Some(saved) = &status.last_saved {
        let _ = writeln!(out, "Last saved: {saved}");
    }
    out
}

pub fn render_apps(apps: &[App], apps_path: &Path) -> String {
    let mut out = String::new();
    if apps.is_empty() {
        let _ = writeln!(out, "No apps configured.");
        let _ = writeln!(out, "Create {} with format:", apps_path.display());
        let _ = writeln!(out, "  app_name: relative/path/from/repo");
        return out;
    }
    let _ = writeln!(out, "Configured apps:");
    let _ = writeln!(out);
    for app in apps {
        let _ = writeln!(
            out,
            "  {:<20} => {}",
            app.name,
            app.relative_path.display()
        );
    }
    out
}
