use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StateError;
use crate::types::{RunLock, StateMap};
use crate::StateStore;

/// State held in memory. Used by tests and embedders that persist state
/// themselves.
#[derive(Default)]
pub struct MemoryStateStore {
  state: Mutex<StateMap>,
  lock: Mutex<Option<RunLock>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_state(state: StateMap) -> Self {
    Self {
      state: Mutex::new(state),
      lock: Mutex::new(None),
    }
  }

  /// Current holder of the run lock.
  pub fn lock_holder(&self) -> Option<String> {
    self
      .lock
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .as_ref()
      .map(|l| l.run_id.clone())
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn load(&self) -> Result<StateMap, StateError> {
    Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
  }

  async fn save(&self, state: &StateMap) -> Result<(), StateError> {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
    Ok(())
  }

  async fn lock(&self, run_id: &str) -> Result<(), StateError> {
    let mut lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    match lock.as_ref() {
      Some(held) if held.run_id != run_id => Err(StateError::ConcurrentRun {
        holder: held.run_id.clone(),
      }),
      _ => {
        *lock = Some(RunLock::new(run_id));
        Ok(())
      }
    }
  }

  async fn unlock(&self, run_id: &str) -> Result<(), StateError> {
    let mut lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    if lock.as_ref().is_some_and(|held| held.run_id == run_id) {
      *lock = None;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_lock_is_exclusive() {
    let store = MemoryStateStore::new();
    store.lock("run-1").await.unwrap();
    assert!(matches!(
      store.lock("run-2").await,
      Err(StateError::ConcurrentRun { holder }) if holder == "run-1"
    ));

    // Only the holder can release it.
    store.unlock("run-2").await.unwrap();
    assert_eq!(store.lock_holder().as_deref(), Some("run-1"));
    store.unlock("run-1").await.unwrap();
    store.lock("run-2").await.unwrap();
  }
}
