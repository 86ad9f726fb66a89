use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
  Create,
  Read,
  Update,
  Delete,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Operation::Create => "create",
      Operation::Read => "read",
      Operation::Update => "update",
      Operation::Delete => "delete",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
  /// No provider is registered for the kind.
  #[error("no provider registered for kind '{kind}'")]
  NotFound { kind: String },

  /// A provider operation failed.
  #[error("{operation} failed: {cause}")]
  Failed { operation: Operation, cause: String },
}

impl ProviderError {
  pub fn failed(operation: Operation, cause: impl Into<String>) -> Self {
    ProviderError::Failed {
      operation,
      cause: cause.into(),
    }
  }
}
