use std::path::Path;
use std::process::{Command as Process, ExitCode};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hiiro_core::allocator::AllocationKind;
use hiiro_core::config::{load_apps, Settings};
use hiiro_core::environment::Environment;
use hiiro_core::git::GitWorktrees;
use hiiro_core::manager::{Providers, Scope, StartOutcome, TaskField, TaskManager};
use hiiro_core::picker::CommandPicker;
use hiiro_core::report::{render_apps, render_listing, render_status};
use hiiro_core::store::TaskStore;
use hiiro_core::tmux::Tmux;

#[derive(Parser)]
#[command(
    name = "h",
    version = hiiro_core::version(),
    about = "Tasks backed by git worktrees and tmux sessions",
    infer_subcommands = true
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage top-level tasks
    #[command(infer_subcommands = true)]
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Manage subtasks of the current task
    #[command(infer_subcommands = true)]
    Subtask {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks and available worktrees
    #[command(visible_alias = "ls")]
    List {
        #[arg(long)]
        json: bool,
    },
    /// Start a task, or switch to it if it exists
    Start { name: String, app: Option<String> },
    /// Switch to a task (interactive if no name)
    Switch {
        name: Option<String>,
        app: Option<String>,
    },
    /// Stop a task and free its worktree (interactive if no name)
    Stop { name: Option<String> },
    /// Show the current task
    #[command(visible_alias = "st")]
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Save the current session's window layout
    Save,
    /// Open an app in a new tmux window (interactive if no name)
    App { name: Option<String> },
    /// List configured apps
    Apps,
    /// Change the current pane's directory to an app or the tree root
    Cd { app: Option<String> },
    /// Print an app path or the tree root
    Path { app: Option<String> },
    /// Print a task's git branch (interactive if no name)
    Branch { name: Option<String> },
    /// Print a task's worktree name (interactive if no name)
    Tree { name: Option<String> },
    /// Print a task's session name (interactive if no name)
    Session { name: Option<String> },
    /// Edit the task store in $EDITOR
    Edit,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("HIIRO_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let (scope, action) = match cli.command {
        Command::Task { action } => (Scope::Task, action),
        Command::Subtask { action } => (Scope::Subtask, action),
    };
    let settings = Settings::load()?;
    debug!(home = %settings.home.display(), work_dir = %settings.work_dir.display(), "settings loaded");
    let invocation = Invocation {
        store: TaskStore::new(settings.tasks_dir()),
        settings,
        scope,
    };
    dispatch(&invocation, action)
}

struct Invocation {
    settings: Settings,
    store: TaskStore,
    scope: Scope,
}

impl Invocation {
    /// Captures git and tmux state, then hands a manager to `f`.
    fn with_manager<T>(&self, f: impl FnOnce(&TaskManager<'_>) -> Result<T>) -> Result<T> {
        let git = GitWorktrees::new(&self.settings.repo_path, &self.settings.work_dir);
        let sessions = Tmux::new();
        let picker = CommandPicker::new(self.settings.picker.clone());
        let env = Environment::capture(&self.settings, &self.store, &git, &sessions)?;
        let manager = TaskManager::new(
            &env,
            self.scope,
            &self.store,
            Providers {
                git: &git,
                sessions: &sessions,
                picker: &picker,
            },
        );
        f(&manager)
    }
}

fn dispatch(invocation: &Invocation, action: TaskAction) -> Result<()> {
    match action {
        TaskAction::List { json } => invocation.with_manager(|manager| {
            let listing = manager.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                print!("{}", render_listing(&listing));
            }
            Ok(())
        }),
        TaskAction::Start { name, app } => invocation.with_manager(|manager| {
            match manager.start(&name, app.as_deref())? {
                StartOutcome::AlreadyExists(switched) => {
                    println!("Task '{}' already exists. Switching...", switched.task);
                    println!("Switched to '{}'", switched.task);
                }
                StartOutcome::Started(started) => {
                    let tree = &started.allocation.tree_name;
                    match &started.allocation.kind {
                        AllocationKind::Reused { from } if from != tree => {
                            println!("Renamed worktree '{from}' to '{tree}'");
                        }
                        AllocationKind::Reused { .. } => {}
                        AllocationKind::Created => println!("Created new worktree '{tree}'"),
                    }
                    println!("Started task '{}' in worktree '{tree}'", started.task.name);
                }
            }
            Ok(())
        }),
        TaskAction::Switch { name, app } => invocation.with_manager(|manager| {
            if let Some(switched) = manager.switch(name.as_deref(), app.as_deref())? {
                println!("Switched to '{}'", switched.task);
            }
            Ok(())
        }),
        TaskAction::Stop { name } => invocation.with_manager(|manager| {
            if let Some(stopped) = manager.stop(name.as_deref())? {
                println!(
                    "Stopped task '{}' (worktree available for reuse)",
                    stopped.task
                );
            }
            Ok(())
        }),
        TaskAction::Status { json } => invocation.with_manager(|manager| {
            let status = manager.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", render_status(&status));
            }
            Ok(())
        }),
        TaskAction::Save => invocation.with_manager(|manager| {
            let saved = manager.save()?;
            println!("Saved task '{}' state ({} windows)", saved.task, saved.windows);
            Ok(())
        }),
        TaskAction::App { name } => invocation.with_manager(|manager| {
            if let Some((name, path)) = manager.open_app(name.as_deref())? {
                println!("Opened '{name}' in new window ({})", path.display());
            }
            Ok(())
        }),
        TaskAction::Apps => {
            let path = invocation.settings.apps_path();
            let apps = load_apps(&path)?;
            print!("{}", render_apps(&apps, &path));
            Ok(())
        }
        TaskAction::Cd { app } => invocation.with_manager(|manager| {
            manager.cd_to_app(app.as_deref())?;
            Ok(())
        }),
        TaskAction::Path { app } => invocation.with_manager(|manager| {
            println!("{}", manager.app_path(app.as_deref())?.display());
            Ok(())
        }),
        TaskAction::Branch { name } => {
            invocation.with_manager(|manager| print_value(manager, name, TaskField::Branch))
        }
        TaskAction::Tree { name } => {
            invocation.with_manager(|manager| print_value(manager, name, TaskField::Tree))
        }
        TaskAction::Session { name } => {
            invocation.with_manager(|manager| print_value(manager, name, TaskField::Session))
        }
        TaskAction::Edit => edit(&invocation.store),
    }
}

fn print_value(manager: &TaskManager<'_>, name: Option<String>, field: TaskField) -> Result<()> {
    if let Some(value) = manager.value_for(name.as_deref(), field)? {
        println!("{value}");
    }
    Ok(())
}

fn edit(store: &TaskStore) -> Result<()> {
    // Loading first migrates any legacy layout so the editor sees tasks.yml.
    store.load_document()?;
    let path = store.path();
    let editor = std::env::var("EDITOR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "nvim".to_string());
    open_in_editor(&editor, &path)
}

fn open_in_editor(editor: &str, path: &Path) -> Result<()> {
    let argv = shell_words::split(editor).context("parse $EDITOR")?;
    let Some((program, args)) = argv.split_first() else {
        bail!("$EDITOR is empty");
    };
    let status = Process::new(program)
        .args(args)
        .arg(path)
        .status()
        .with_context(|| format!("run editor '{program}'"))?;
    if !status.success() {
        bail!("editor '{program}' exited with {status}");
    }
    Ok(())
}
