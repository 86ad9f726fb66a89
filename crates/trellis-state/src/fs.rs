use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StateError;
use crate::types::{RunLock, StateMap};
use crate::StateStore;

const STATE_VERSION: u32 = 1;

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
  version: u32,
  #[serde(default)]
  resources: StateMap,
}

/// State kept in a JSON file.
///
/// The run lock is a sibling `<file>.lock` created exclusively, so only one
/// process can hold it:
/// ```text
/// {dir}/
/// ├── state.json
/// └── state.json.lock   (while a run is active)
/// ```
pub struct FsStateStore {
  path: PathBuf,
}

impl FsStateStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn sibling(&self, suffix: &str) -> PathBuf {
    let mut name = self.path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
  }

  fn lock_path(&self) -> PathBuf {
    self.sibling(".lock")
  }

  async fn read_lock(&self) -> Result<Option<RunLock>, StateError> {
    match fs::read_to_string(self.lock_path()).await {
      Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }
}

#[async_trait]
impl StateStore for FsStateStore {
  async fn load(&self) -> Result<StateMap, StateError> {
    if !self.path.exists() {
      return Ok(StateMap::new());
    }
    let content = fs::read_to_string(&self.path).await?;
    let file: StateFile = serde_json::from_str(&content)?;
    Ok(file.resources)
  }

  async fn save(&self, state: &StateMap) -> Result<(), StateError> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let file = StateFile {
      version: STATE_VERSION,
      resources: state.clone(),
    };
    let content = serde_json::to_string_pretty(&file)?;

    // Write then rename so a crash never leaves a truncated state file.
    let tmp = self.sibling(".tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, &self.path).await?;
    Ok(())
  }

  async fn lock(&self, run_id: &str) -> Result<(), StateError> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let opened = fs::OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(self.lock_path())
      .await;

    match opened {
      Ok(mut file) => {
        let content = serde_json::to_vec(&RunLock::new(run_id))?;
        file.write_all(&content).await?;
        file.flush().await?;
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
        let holder = self
          .read_lock()
          .await
          .ok()
          .flatten()
          .map(|l| l.run_id)
          .unwrap_or_else(|| "unknown".to_string());
        if holder == run_id {
          return Ok(());
        }
        Err(StateError::ConcurrentRun { holder })
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn unlock(&self, run_id: &str) -> Result<(), StateError> {
    match self.read_lock().await? {
      Some(held) if held.run_id == run_id => {
        fs::remove_file(self.lock_path()).await?;
        Ok(())
      }
      _ => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::StateRecord;
  use chrono::Utc;
  use serde_json::json;
  use trellis_graph::{Address, InstanceKey};

  fn record(id: &str) -> StateRecord {
    StateRecord {
      kind: "null".to_string(),
      id: id.to_string(),
      attrs: json!({ "name": "a" }).as_object().cloned().unwrap(),
      computed_attrs: serde_json::Map::new(),
      dependencies: vec![Address::root("db")],
      updated_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn test_load_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStateStore::new(dir.path().join("state.json"));
    assert!(store.load().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStateStore::new(dir.path().join("nested").join("state.json"));

    let mut state = StateMap::new();
    let path = vec!["net".to_string()];
    state.insert(Address::new(&path, "subnet", InstanceKey::Key("a".into())), record("1"));
    state.insert(Address::new(&[], "web", InstanceKey::Index(0)), record("2"));
    store.save(&state).await.unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(raw.contains(r#""net.subnet[\"a\"]""#));

    assert_eq!(store.load().await.unwrap(), state);
  }

  #[tokio::test]
  async fn test_lock_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStateStore::new(dir.path().join("state.json"));
    let other = FsStateStore::new(dir.path().join("state.json"));

    store.lock("run-1").await.unwrap();
    assert!(dir.path().join("state.json.lock").exists());
    assert!(matches!(
      other.lock("run-2").await,
      Err(StateError::ConcurrentRun { holder }) if holder == "run-1"
    ));

    store.unlock("run-1").await.unwrap();
    assert!(!dir.path().join("state.json.lock").exists());
    other.lock("run-2").await.unwrap();
  }
}
