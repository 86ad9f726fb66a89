//! Error types for planning and applying.

use serde::Serialize;
use thiserror::Error;
use trellis_expand::ExpandError;
use trellis_graph::{GraphError, NodeId};
use trellis_provider::{Operation, ProviderError};
use trellis_state::StateError;

/// Errors that abort a plan or a run as a whole.
#[derive(Debug, Error)]
pub enum EngineError {
  /// Expansion or unit composition failed.
  #[error(transparent)]
  Expand(#[from] ExpandError),

  /// The dependency graph is invalid.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// No provider handles an instance's kind.
  #[error("no provider registered for kind '{kind}' (used by {address})")]
  ProviderNotFound { kind: String, address: String },

  /// Refreshing a recorded instance from its provider failed.
  #[error("refresh of {address} failed: {source}")]
  Refresh {
    address: String,
    #[source]
    source: ProviderError,
  },

  /// Loading, saving or locking state failed.
  #[error(transparent)]
  State(#[from] StateError),
}

impl EngineError {
  /// Structural errors are detected before any provider call.
  pub fn is_structural(&self) -> bool {
    matches!(
      self,
      EngineError::Expand(_) | EngineError::Graph(_) | EngineError::ProviderNotFound { .. }
    )
  }
}

/// Why a single instance failed during a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstanceError {
  /// The provider rejected the operation.
  #[error("{operation} failed: {cause}")]
  Provider { operation: Operation, cause: String },

  /// No provider handles the instance's kind.
  #[error("no provider registered for kind '{kind}'")]
  NoProvider { kind: String },

  /// The operation did not finish within its deadline.
  #[error("timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  /// Re-evaluating the instance's attributes or unit boundary failed.
  #[error(transparent)]
  Evaluation(#[from] ExpandError),

  /// Attributes were still unknown when the instance was dispatched.
  #[error("attributes still unknown at apply time: {}", names.join(", "))]
  UnknownAttributes { names: Vec<String> },

  /// The worker running the operation panicked or was lost.
  #[error("worker task terminated: {message}")]
  Terminated { message: String },
}

impl From<ProviderError> for InstanceError {
  fn from(error: ProviderError) -> Self {
    match error {
      ProviderError::Failed { operation, cause } => InstanceError::Provider { operation, cause },
      ProviderError::NotFound { kind } => InstanceError::NoProvider { kind },
    }
  }
}

/// A node that failed, with its error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceFailure {
  #[serde(serialize_with = "display")]
  pub address: NodeId,
  #[serde(serialize_with = "display")]
  pub error: InstanceError,
}

/// A node that was never attempted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSkip {
  #[serde(serialize_with = "display")]
  pub address: NodeId,
  /// Address of the failed ancestor, or `cancelled`.
  pub cause: String,
}

fn display<T: std::fmt::Display, S: serde::Serializer>(
  value: &T,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  serializer.collect_str(value)
}
