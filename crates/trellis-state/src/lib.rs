//! Trellis State
//!
//! This crate provides the storage trait and implementations for the
//! recorded state of applied resources.
//!
//! The [`StateStore`] trait defines operations for:
//! - Loading and saving the full [`StateMap`]
//! - Taking and releasing the advisory run lock, so two runs never apply
//!   against the same state concurrently

mod error;
mod fs;
mod memory;
mod sqlite;
mod types;

pub use error::StateError;
pub use fs::FsStateStore;
pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use types::{RunLock, StateMap, StateRecord};

use async_trait::async_trait;

/// Storage trait for recorded resource state.
#[async_trait]
pub trait StateStore: Send + Sync {
  /// Load every recorded instance.
  async fn load(&self) -> Result<StateMap, StateError>;

  /// Replace the recorded state.
  async fn save(&self, state: &StateMap) -> Result<(), StateError>;

  /// Take the run lock for `run_id`. Fails with
  /// [`StateError::ConcurrentRun`] if another run holds it.
  async fn lock(&self, run_id: &str) -> Result<(), StateError>;

  /// Release the run lock if `run_id` holds it.
  async fn unlock(&self, run_id: &str) -> Result<(), StateError>;
}
