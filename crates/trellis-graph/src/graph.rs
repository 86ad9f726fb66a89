use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::address::NodeId;
use crate::deps::expression_dependencies;
use crate::error::GraphError;
use crate::instance::Expansion;

/// Directed acyclic graph over instances and unit boundary nodes.
///
/// An edge `a -> b` means `a` must be resolved before `b`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
  /// node -> nodes that depend on it.
  adjacency: BTreeMap<NodeId, Vec<NodeId>>,
  /// node -> nodes it depends on.
  reverse_adjacency: BTreeMap<NodeId, Vec<NodeId>>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_node(&mut self, node: NodeId) {
    self.adjacency.entry(node.clone()).or_default();
    self.reverse_adjacency.entry(node).or_default();
  }

  /// Add an edge saying `dependent` must follow `dependency`. Both nodes
  /// are added if missing; duplicate edges are ignored.
  pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
    self.add_node(dependency.clone());
    self.add_node(dependent.clone());

    let downstream = self.adjacency.entry(dependency.clone()).or_default();
    if downstream.contains(&dependent) {
      return;
    }
    downstream.push(dependent.clone());
    self
      .reverse_adjacency
      .entry(dependent)
      .or_default()
      .push(dependency);
  }

  pub fn contains(&self, node: &NodeId) -> bool {
    self.adjacency.contains_key(node)
  }

  pub fn len(&self) -> usize {
    self.adjacency.len()
  }

  pub fn is_empty(&self) -> bool {
    self.adjacency.is_empty()
  }

  /// All nodes, in address order.
  pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
    self.adjacency.keys()
  }

  /// All edges as `(dependency, dependent)` pairs.
  pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> {
    self
      .adjacency
      .iter()
      .flat_map(|(from, to)| to.iter().map(move |to| (from, to)))
  }

  /// Nodes `node` depends on.
  pub fn dependencies(&self, node: &NodeId) -> &[NodeId] {
    self
      .reverse_adjacency
      .get(node)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Nodes that depend on `node`.
  pub fn dependents(&self, node: &NodeId) -> &[NodeId] {
    self
      .adjacency
      .get(node)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Nodes with no dependencies.
  pub fn entry_points(&self) -> Vec<&NodeId> {
    self
      .nodes()
      .filter(|node| self.dependencies(node).is_empty())
      .collect()
  }

  /// Every node reachable from `node` along dependent edges.
  pub fn transitive_dependents(&self, node: &NodeId) -> BTreeSet<NodeId> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&NodeId> = self.dependents(node).iter().collect();
    while let Some(next) = queue.pop_front() {
      if seen.insert(next.clone()) {
        queue.extend(self.dependents(next));
      }
    }
    seen
  }

  /// Fail with [`GraphError::Cycle`] if the graph is not acyclic.
  ///
  /// Iterative depth-first search along dependency edges, keeping the
  /// current path as a recursion stack. A back-edge to a node on the stack
  /// reports the stack from that node onward.
  pub fn detect_cycle(&self) -> Result<(), GraphError> {
    let mut finished: BTreeSet<&NodeId> = BTreeSet::new();

    for start in self.nodes() {
      if finished.contains(start) {
        continue;
      }

      let mut path: Vec<&NodeId> = vec![start];
      let mut on_path: BTreeSet<&NodeId> = BTreeSet::from([start]);
      let mut cursors: Vec<usize> = vec![0];

      while let Some(node) = path.last().copied() {
        let Some(cursor) = cursors.last_mut() else {
          break;
        };
        let deps = self.dependencies(node);

        if *cursor >= deps.len() {
          path.pop();
          cursors.pop();
          on_path.remove(node);
          finished.insert(node);
          continue;
        }

        let next = &deps[*cursor];
        *cursor += 1;

        if on_path.contains(next) {
          let pos = path.iter().position(|n| *n == next).unwrap_or(0);
          let mut cycle: Vec<NodeId> = path[pos..].iter().map(|n| (*n).clone()).collect();
          cycle.push(next.clone());
          return Err(GraphError::Cycle { path: cycle });
        }
        if !finished.contains(next) {
          path.push(next);
          on_path.insert(next);
          cursors.push(0);
        }
      }
    }

    Ok(())
  }

  /// Nodes ordered so that every node follows its dependencies. Ties are
  /// broken by address order.
  pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
    self.detect_cycle()?;

    let mut remaining: BTreeMap<&NodeId, usize> = self
      .nodes()
      .map(|node| (node, self.dependencies(node).len()))
      .collect();
    let mut ready: BTreeSet<&NodeId> = remaining
      .iter()
      .filter(|(_, count)| **count == 0)
      .map(|(node, _)| *node)
      .collect();
    let mut order = Vec::with_capacity(self.len());

    while let Some(node) = ready.pop_first() {
      order.push(node.clone());
      for dependent in self.dependents(node) {
        if let Some(count) = remaining.get_mut(dependent) {
          *count -= 1;
          if *count == 0 {
            ready.insert(dependent);
          }
        }
      }
    }

    Ok(order)
  }
}

/// Build the dependency graph of an expansion.
///
/// Nodes are every instance, the inputs of every nested unit and the outputs
/// of every unit. Edges come from attribute references, `depends_on`
/// ordering, unit input expressions (evaluated in the caller) and unit
/// output expressions. Fails with [`GraphError::Cycle`].
pub fn build(expansion: &Expansion) -> Result<DependencyGraph, GraphError> {
  let mut graph = DependencyGraph::new();

  for (address, instance) in &expansion.instances {
    let node = NodeId::Instance(address.clone());
    graph.add_node(node.clone());
    for dependency in instance.all_dependencies() {
      graph.add_edge(dependency, node.clone());
    }
  }

  for (path, expanded) in &expansion.units {
    let unit = &expanded.unit;

    if let Some(parent_path) = expanded.parent_path() {
      let call = expansion
        .unit(parent_path)
        .zip(path.last())
        .and_then(|(parent, name)| parent.unit.call(name));

      for name in unit.inputs.keys() {
        let node = NodeId::input(path, name);
        graph.add_node(node.clone());
        // Defaults are evaluated without a scope and read nothing.
        if let Some(expr) = call.and_then(|c| c.inputs.get(name)) {
          for dependency in expression_dependencies(expansion, parent_path, expr) {
            graph.add_edge(dependency, node.clone());
          }
        }
      }
    }

    for (name, expr) in &unit.outputs {
      let node = NodeId::output(path, name);
      graph.add_node(node.clone());
      for dependency in expression_dependencies(expansion, path, expr) {
        graph.add_edge(dependency, node.clone());
      }
    }
  }

  graph.detect_cycle()?;
  Ok(graph)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::address::Address;

  fn node(name: &str) -> NodeId {
    NodeId::Instance(Address::root(name))
  }

  #[test]
  fn test_dependencies_and_dependents() {
    let mut graph = DependencyGraph::new();
    graph.add_edge(node("a"), node("b"));
    graph.add_edge(node("a"), node("b"));
    graph.add_edge(node("b"), node("c"));

    assert_eq!(graph.dependencies(&node("b")), &[node("a")]);
    assert_eq!(graph.dependents(&node("a")), &[node("b")]);
    assert_eq!(graph.edges().count(), 2);
    assert_eq!(graph.entry_points(), vec![&node("a")]);
    assert_eq!(
      graph.transitive_dependents(&node("a")),
      BTreeSet::from([node("b"), node("c")])
    );
  }

  #[test]
  fn test_topological_order() {
    let mut graph = DependencyGraph::new();
    graph.add_edge(node("z"), node("m"));
    graph.add_edge(node("m"), node("a"));
    graph.add_node(node("solo"));

    let order = graph.topological_order().unwrap();
    let pos = |n: &str| order.iter().position(|x| *x == node(n)).unwrap();
    assert_eq!(order.len(), 4);
    assert!(pos("z") < pos("m"));
    assert!(pos("m") < pos("a"));
  }

  #[test]
  fn test_cycle_reports_full_path() {
    let mut graph = DependencyGraph::new();
    graph.add_edge(node("a"), node("b"));
    graph.add_edge(node("b"), node("c"));
    graph.add_edge(node("c"), node("a"));
    graph.add_edge(node("x"), node("a"));

    let err = graph.detect_cycle().unwrap_err();
    let GraphError::Cycle { path } = err.clone() else {
      panic!("expected cycle error");
    };
    assert_eq!(path.first(), path.last());
    for name in ["a", "b", "c"] {
      assert!(path.contains(&node(name)));
    }
    assert!(!path.contains(&node("x")));
    assert!(err.to_string().starts_with("dependency cycle: "));
  }

  #[test]
  fn test_self_edge_is_cycle() {
    let mut graph = DependencyGraph::new();
    graph.add_edge(node("a"), node("a"));
    assert!(matches!(
      graph.detect_cycle(),
      Err(GraphError::Cycle { path }) if path == vec![node("a"), node("a")]
    ));
  }
}
