use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use trellis_expand::Values;
use trellis_graph::{Address, DependencyGraph, NodeId};
use trellis_state::StateMap;

use crate::error::{InstanceError, InstanceFailure, InstanceSkip};
use crate::plan::{Action, Plan};

/// Lifecycle of a node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  Pending,
  Ready,
  Running,
  Done,
  Failed,
  Skipped,
}

/// All mutable state of one run.
///
/// Owned by the coordinator loop; workers only see the inputs of their own
/// operation and hand results back.
#[derive(Debug)]
pub struct RunContext {
  states: BTreeMap<NodeId, NodeState>,
  /// Dependencies each node still waits for.
  remaining: BTreeMap<NodeId, usize>,
  ready: VecDeque<NodeId>,
  pub(crate) values: Values,
  pub(crate) state: StateMap,
  pub(crate) done: BTreeMap<Address, Action>,
  pub(crate) failed: Vec<InstanceFailure>,
  pub(crate) skipped: Vec<InstanceSkip>,
  cancel: CancellationToken,
}

impl RunContext {
  pub fn new(plan: &Plan, state: StateMap, cancel: CancellationToken) -> Self {
    let graph = &plan.graph;
    let mut states = BTreeMap::new();
    let mut remaining = BTreeMap::new();
    let mut ready = VecDeque::new();

    for node in graph.nodes() {
      let count = graph.dependencies(node).len();
      if count == 0 {
        states.insert(node.clone(), NodeState::Ready);
        ready.push_back(node.clone());
      } else {
        states.insert(node.clone(), NodeState::Pending);
      }
      remaining.insert(node.clone(), count);
    }

    Self {
      states,
      remaining,
      ready,
      values: plan.composition.values.clone(),
      state,
      done: BTreeMap::new(),
      failed: Vec::new(),
      skipped: Vec::new(),
      cancel,
    }
  }

  pub fn state_of(&self, node: &NodeId) -> Option<NodeState> {
    self.states.get(node).copied()
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Next ready node, marked as running.
  pub(crate) fn next_ready(&mut self) -> Option<NodeId> {
    let node = self.ready.pop_front()?;
    self.states.insert(node.clone(), NodeState::Running);
    Some(node)
  }

  /// Mark `node` done and queue dependents whose dependencies are all done.
  pub(crate) fn complete(&mut self, graph: &DependencyGraph, node: &NodeId) {
    self.states.insert(node.clone(), NodeState::Done);
    for dependent in graph.dependents(node) {
      let Some(count) = self.remaining.get_mut(dependent) else {
        continue;
      };
      *count = count.saturating_sub(1);
      if *count == 0 && self.states.get(dependent) == Some(&NodeState::Pending) {
        self.states.insert(dependent.clone(), NodeState::Ready);
        self.ready.push_back(dependent.clone());
      }
    }
  }

  /// Mark `node` failed and skip every transitive dependent that has not
  /// started. Returns the new skips.
  pub(crate) fn fail(
    &mut self,
    graph: &DependencyGraph,
    node: &NodeId,
    error: InstanceError,
  ) -> Vec<InstanceSkip> {
    self.states.insert(node.clone(), NodeState::Failed);
    self.failed.push(InstanceFailure {
      address: node.clone(),
      error,
    });

    let cause = node.to_string();
    let mut skips = Vec::new();
    for dependent in graph.transitive_dependents(node) {
      if self.states.get(&dependent) == Some(&NodeState::Pending) {
        self.states.insert(dependent.clone(), NodeState::Skipped);
        skips.push(InstanceSkip {
          address: dependent,
          cause: cause.clone(),
        });
      }
    }
    self.skipped.extend(skips.iter().cloned());
    skips
  }

  /// Skip every node that never started, with `cause`. Returns the skips.
  pub(crate) fn skip_unstarted(&mut self, cause: &str) -> Vec<InstanceSkip> {
    self.ready.clear();
    let unstarted: BTreeSet<NodeId> = self
      .states
      .iter()
      .filter(|(_, state)| matches!(state, NodeState::Pending | NodeState::Ready))
      .map(|(node, _)| node.clone())
      .collect();

    let skips: Vec<InstanceSkip> = unstarted
      .into_iter()
      .map(|node| {
        self.states.insert(node.clone(), NodeState::Skipped);
        InstanceSkip {
          address: node,
          cause: cause.to_string(),
        }
      })
      .collect();
    self.skipped.extend(skips.iter().cloned());
    skips
  }

  /// Nodes still marked running.
  pub(crate) fn running(&self) -> Vec<NodeId> {
    self
      .states
      .iter()
      .filter(|(_, state)| **state == NodeState::Running)
      .map(|(node, _)| node.clone())
      .collect()
  }

  /// Record a failure for a node without touching its dependents.
  pub(crate) fn record_failure(&mut self, node: &NodeId, error: InstanceError) {
    self.states.insert(node.clone(), NodeState::Failed);
    self.failed.push(InstanceFailure {
      address: node.clone(),
      error,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_provider::ProviderRegistry;
  use trellis_state::StateRecord;

  fn record(dependencies: Vec<Address>) -> StateRecord {
    StateRecord {
      kind: "null".to_string(),
      id: "id".to_string(),
      attrs: serde_json::Map::new(),
      computed_attrs: serde_json::Map::new(),
      dependencies,
      updated_at: chrono::Utc::now(),
    }
  }

  fn chain_plan() -> (Plan, StateMap) {
    // c depends on b depends on a; destroy order is c, b, a.
    let (a, b, c) = (Address::root("a"), Address::root("b"), Address::root("c"));
    let mut state = StateMap::new();
    state.insert(a.clone(), record(vec![]));
    state.insert(b.clone(), record(vec![a]));
    state.insert(c, record(vec![b]));
    let plan = crate::plan::plan_destroy(&state, &ProviderRegistry::with_builtins()).unwrap();
    (plan, state)
  }

  fn node(name: &str) -> NodeId {
    NodeId::Instance(Address::root(name))
  }

  #[test]
  fn test_ready_follows_completion() {
    let (plan, state) = chain_plan();
    let mut ctx = RunContext::new(&plan, state, CancellationToken::new());

    assert_eq!(ctx.state_of(&node("c")), Some(NodeState::Ready));
    assert_eq!(ctx.state_of(&node("a")), Some(NodeState::Pending));

    let next = ctx.next_ready().unwrap();
    assert_eq!(next, node("c"));
    assert_eq!(ctx.state_of(&next), Some(NodeState::Running));
    assert!(ctx.next_ready().is_none());

    ctx.complete(&plan.graph, &next);
    assert_eq!(ctx.state_of(&node("b")), Some(NodeState::Ready));
  }

  #[test]
  fn test_failure_skips_transitive_dependents() {
    let (plan, state) = chain_plan();
    let mut ctx = RunContext::new(&plan, state, CancellationToken::new());

    let first = ctx.next_ready().unwrap();
    let skips = ctx.fail(
      &plan.graph,
      &first,
      InstanceError::Timeout { timeout_ms: 5 },
    );

    let skipped: Vec<String> = skips.iter().map(|s| s.address.to_string()).collect();
    assert_eq!(skipped, vec!["a", "b"]);
    assert!(skips.iter().all(|s| s.cause == "c"));
    assert_eq!(ctx.failed.len(), 1);
    assert!(ctx.skip_unstarted("cancelled").is_empty());
  }

  #[test]
  fn test_skip_unstarted() {
    let (plan, state) = chain_plan();
    let mut ctx = RunContext::new(&plan, state, CancellationToken::new());

    let skips = ctx.skip_unstarted("cancelled");
    assert_eq!(skips.len(), 3);
    assert!(ctx.next_ready().is_none());
    assert!(ctx.running().is_empty());
  }
}
