use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::model::App;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to parse apps file: {0}")]
    Apps(#[from] serde_yaml::Error),
    #[error("Invalid picker command: {0}")]
    Picker(#[from] shell_words::ParseError),
    #[error("Unable to resolve home directory; set HIIRO_HOME to an absolute path")]
    MissingHome,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HiiroConfig {
    /// Directory holding every worktree; tree names are relative to it.
    pub work_dir: Option<String>,
    /// Bare repository the worktrees are attached to.
    pub repo_path: Option<String>,
    /// Fuzzy picker command line, e.g. "sk" or "fzf --reverse".
    pub picker: Option<String>,
    /// Map of tree name -> task name that is permanently bound.
    #[serde(default)]
    pub reserved_trees: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedTree {
    pub tree: String,
    pub task: String,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub home: PathBuf,
    pub work_dir: PathBuf,
    pub repo_path: PathBuf,
    pub picker: Vec<String>,
    pub reserved: Vec<ReservedTree>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let home = resolve_hiiro_home_dir().ok_or(ConfigError::MissingHome)?;
        let user_home = resolve_user_home_dir().ok_or(ConfigError::MissingHome)?;
        let config = load_config(&home)?;
        Self::from_config(home, &user_home, config)
    }

    pub fn from_config(
        home: PathBuf,
        user_home: &Path,
        config: HiiroConfig,
    ) -> Result<Self, ConfigError> {
        let work_dir = env_override("HIIRO_WORK_DIR")
            .or(config.work_dir)
            .map(|raw| expand_home(&raw, user_home))
            .unwrap_or_else(|| user_home.join("work"));
        let repo_path = env_override("HIIRO_REPO_PATH")
            .or(config.repo_path)
            .map(|raw| expand_home(&raw, user_home))
            .unwrap_or_else(|| work_dir.join(".bare"));
        let picker = shell_words::split(config.picker.as_deref().unwrap_or("sk"))?;
        let reserved = config
            .reserved_trees
            .into_iter()
            .map(|(tree, task)| ReservedTree { tree, task })
            .collect();
        Ok(Self {
            home,
            work_dir,
            repo_path,
            picker,
            reserved,
        })
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.home.join("tasks")
    }

    pub fn apps_path(&self) -> PathBuf {
        self.home.join("apps.yml")
    }
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.toml")
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    env_override("HOME")
        .or_else(|| env_override("USERPROFILE"))
        .map(PathBuf::from)
}

pub fn resolve_hiiro_home_dir() -> Option<PathBuf> {
    if let Some(value) = env_override("HIIRO_HOME") {
        return Some(PathBuf::from(value));
    }
    resolve_user_home_dir().map(|home| home.join(".config").join("hiiro"))
}

pub fn load_config(home: &Path) -> Result<HiiroConfig, ConfigError> {
    let path = config_path(home);
    if !path.is_file() {
        return Ok(HiiroConfig::default());
    }
    let text = fs::read_to_string(&path)?;
    Ok(toml::from_str(&text)?)
}

/// Reads `apps.yml` (app name -> path relative to a tree root), keeping file order.
pub fn load_apps(path: &Path) -> Result<Vec<App>, ConfigError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mapping: serde_yaml::Mapping = serde_yaml::from_str(&text)?;
    Ok(mapping
        .into_iter()
        .filter_map(|(name, rel)| {
            let name = yaml_scalar(&name)?;
            let rel = yaml_scalar(&rel)?;
            Some(App::new(name, rel))
        })
        .collect())
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn expand_home(raw: &str, user_home: &Path) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => user_home.join(rest),
        None if raw == "~" => user_home.to_path_buf(),
        None => PathBuf::from(raw),
    }
}

fn env_override(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
