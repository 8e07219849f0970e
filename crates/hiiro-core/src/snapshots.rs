use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::legacy::sanitize_task_name;
use crate::model::WindowInfo;
use crate::store::StoreError;

/// Window layout captured by `save`. Informational only; nothing restores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub task: String,
    pub session: String,
    pub saved_at: String,
    #[serde(default)]
    pub windows: Vec<WindowInfo>,
}

pub fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339()
}

pub fn snapshots_dir(tasks_dir: &Path) -> PathBuf {
    tasks_dir.join("snapshots")
}

pub fn snapshot_path(tasks_dir: &Path, task_name: &str) -> PathBuf {
    snapshots_dir(tasks_dir).join(format!("{}.yml", sanitize_task_name(task_name)))
}

pub fn write_snapshot(tasks_dir: &Path, snapshot: &SessionSnapshot) -> Result<PathBuf, StoreError> {
    let dir = snapshots_dir(tasks_dir);
    fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
    let path = snapshot_path(tasks_dir, &snapshot.task);
    let body = serde_yaml::to_string(snapshot).map_err(StoreError::Serialize)?;
    fs::write(&path, body).map_err(|err| StoreError::io(&path, err))?;
    Ok(path)
}

pub fn read_snapshot(tasks_dir: &Path, task_name: &str) -> Result<Option<SessionSnapshot>, StoreError> {
    let path = snapshot_path(tasks_dir, task_name);
    if !path.is_file() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
    let snapshot = serde_yaml::from_str(&raw).map_err(|err| StoreError::parse(&path, err))?;
    Ok(Some(snapshot))
}
