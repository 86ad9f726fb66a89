use thiserror::Error;

use crate::address::NodeId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
  /// The graph contains a cycle; `path` lists the nodes in traversal order,
  /// ending with the node that closes the cycle.
  #[error("dependency cycle: {}", display_path(path))]
  Cycle { path: Vec<NodeId> },

  #[error("invalid instance address: {0}")]
  InvalidAddress(String),
}

fn display_path(path: &[NodeId]) -> String {
  path
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(" -> ")
}
