use std::collections::HashMap;

use trellis_expr::Value;
use trellis_graph::NodeId;

/// Current value of every graph node: instance objects, unit inputs and
/// unit outputs. Missing nodes read as unknown.
#[derive(Debug, Clone, Default)]
pub struct Values {
  nodes: HashMap<NodeId, Value>,
}

impl Values {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, node: &NodeId) -> Option<&Value> {
    self.nodes.get(node)
  }

  /// The node's value, or unknown if it has none yet.
  pub fn value_of(&self, node: &NodeId) -> Value {
    self.nodes.get(node).cloned().unwrap_or(Value::Unknown)
  }

  pub fn set(&mut self, node: NodeId, value: Value) {
    self.nodes.insert(node, value);
  }

  pub fn remove(&mut self, node: &NodeId) -> Option<Value> {
    self.nodes.remove(node)
  }
}
