//! The planner: diff the desired instance set against recorded state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use trellis_expand::{Composition, Values, evaluate_attributes, evaluate_node};
use trellis_expr::Value;
use trellis_graph::{Address, DependencyGraph, NodeId, build, instance_object};
use trellis_provider::ProviderRegistry;
use trellis_state::{StateMap, StateRecord};

use crate::error::EngineError;

/// What a run will do to one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  Create,
  Update,
  /// Delete the recorded resource, then create the configured one.
  Replace,
  Destroy,
  NoOp,
}

impl Action {
  fn symbol(self) -> &'static str {
    match self {
      Action::Create => "+",
      Action::Update => "~",
      Action::Replace => "-/+",
      Action::Destroy => "-",
      Action::NoOp => " ",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Action::Create => "create",
      Action::Update => "update",
      Action::Replace => "replace",
      Action::Destroy => "destroy",
      Action::NoOp => "no-op",
    };
    f.write_str(name)
  }
}

/// The planned action for one address.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
  pub address: Address,
  pub action: Action,
  /// Kind the action is applied with. For a destroy, the recorded kind.
  pub kind: String,
  /// Recorded state before the run.
  pub prior: Option<StateRecord>,
  /// Desired attributes as far as they are known at plan time. Empty for a
  /// destroy.
  pub desired: BTreeMap<String, Value>,
}

/// Number of planned changes per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
  pub create: usize,
  pub update: usize,
  pub replace: usize,
  pub destroy: usize,
  pub no_op: usize,
}

/// A computed plan, ready to be applied.
#[derive(Debug, Clone)]
pub struct Plan {
  pub(crate) composition: Composition,
  /// Execution graph: the dependency graph plus destroy nodes.
  pub(crate) graph: DependencyGraph,
  pub(crate) changes: BTreeMap<Address, PlannedChange>,
  /// Values as known at plan time.
  values: Values,
}

impl Plan {
  pub fn changes(&self) -> impl Iterator<Item = &PlannedChange> {
    self.changes.values()
  }

  pub fn get(&self, address: &Address) -> Option<&PlannedChange> {
    self.changes.get(address)
  }

  pub fn action(&self, address: &Address) -> Option<Action> {
    self.changes.get(address).map(|change| change.action)
  }

  /// True when applying the plan would change nothing.
  pub fn is_empty(&self) -> bool {
    self.changes.values().all(|change| change.action == Action::NoOp)
  }

  pub fn counts(&self) -> ActionCounts {
    let mut counts = ActionCounts::default();
    for change in self.changes.values() {
      match change.action {
        Action::Create => counts.create += 1,
        Action::Update => counts.update += 1,
        Action::Replace => counts.replace += 1,
        Action::Destroy => counts.destroy += 1,
        Action::NoOp => counts.no_op += 1,
      }
    }
    counts
  }

  pub fn graph(&self) -> &DependencyGraph {
    &self.graph
  }

  /// Root outputs as known at plan time; may contain unknowns.
  pub fn outputs(&self) -> BTreeMap<String, Value> {
    let Some(root) = self.composition.expansion.unit(&[]) else {
      return BTreeMap::new();
    };
    root
      .unit
      .outputs
      .keys()
      .map(|name| (name.clone(), self.values.value_of(&NodeId::output(&[], name))))
      .collect()
  }
}

impl fmt::Display for Plan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for change in self.changes.values() {
      if change.action == Action::NoOp {
        continue;
      }
      writeln!(f, "{:>3} {} ({})", change.action.symbol(), change.address, change.kind)?;
      for (name, value) in &change.desired {
        writeln!(f, "        {name} = {}", render_value(value))?;
      }
    }
    let counts = self.counts();
    write!(
      f,
      "Plan: {} to create, {} to update, {} to replace, {} to destroy.",
      counts.create, counts.update, counts.replace, counts.destroy
    )
  }
}

fn render_value(value: &Value) -> String {
  if !value.is_wholly_known() {
    return "(known after apply)".to_string();
  }
  match value.to_json() {
    Some(json) => json.to_string(),
    None => value.to_string(),
  }
}

/// The value a recorded instance exposes to expressions.
pub(crate) fn record_value(record: &StateRecord) -> Value {
  let attributes = record
    .attrs
    .iter()
    .map(|(name, value)| (name.clone(), Value::from(value.clone())))
    .collect();
  instance_object(
    attributes,
    Value::from(record.id.clone()),
    Value::from(serde_json::Value::Object(record.computed_attrs.clone())),
  )
}

/// True when `desired` is wholly known and equal to what `record` was
/// applied with.
pub(crate) fn matches_record(desired: &BTreeMap<String, Value>, record: &StateRecord) -> bool {
  desired.len() == record.attrs.len()
    && desired.iter().all(|(name, value)| {
      value.is_wholly_known()
        && record
          .attrs
          .get(name)
          .is_some_and(|recorded| Value::from(recorded.clone()) == *value)
    })
}

fn diff(kind: &str, desired: &BTreeMap<String, Value>, prior: Option<&StateRecord>) -> Action {
  match prior {
    None => Action::Create,
    Some(record) if record.kind != kind => Action::Replace,
    Some(record) if matches_record(desired, record) => Action::NoOp,
    Some(_) => Action::Update,
  }
}

/// Plan the changes that bring `state` in line with a composed
/// configuration.
///
/// Instances are visited in dependency order. An instance planned as NoOp
/// exposes its recorded values to later instances; an update exposes its
/// recorded id; everything else exposes unknown `id` and `computed_attrs`.
/// Recorded addresses missing from the configuration are destroyed after
/// every instance that depended on them.
pub fn plan(
  composition: Composition,
  state: &StateMap,
  providers: &ProviderRegistry,
) -> Result<Plan, EngineError> {
  let expansion = &composition.expansion;
  for (address, instance) in &expansion.instances {
    require_provider(providers, &instance.kind, address)?;
  }

  let mut graph = build(expansion)?;
  let order = graph.topological_order()?;

  let mut values = composition.values.clone();
  let mut changes = BTreeMap::new();

  for node in order {
    let NodeId::Instance(address) = &node else {
      let value = evaluate_node(expansion, &values, &node)?;
      values.set(node, value);
      continue;
    };
    let Some(instance) = expansion.instance(address) else {
      continue;
    };

    let desired = evaluate_attributes(expansion, &values, instance)?;
    let prior = state.get(address);
    let action = diff(&instance.kind, &desired, prior);
    if action == Action::Replace {
      if let Some(record) = prior {
        require_provider(providers, &record.kind, address)?;
      }
    }

    let value = match (action, prior) {
      (Action::NoOp, Some(record)) => record_value(record),
      (Action::Update, Some(record)) => instance_object(
        desired.clone(),
        Value::from(record.id.clone()),
        Value::Unknown,
      ),
      _ => instance_object(desired.clone(), Value::Unknown, Value::Unknown),
    };
    values.set(node.clone(), value);

    changes.insert(
      address.clone(),
      PlannedChange {
        address: address.clone(),
        action,
        kind: instance.kind.clone(),
        prior: prior.cloned(),
        desired,
      },
    );
  }

  let orphans: BTreeSet<Address> = state
    .keys()
    .filter(|address| expansion.instance(address).is_none())
    .cloned()
    .collect();
  add_destroys(&mut graph, &mut changes, state, &orphans, providers)?;

  Ok(Plan {
    composition,
    graph,
    changes,
    values,
  })
}

/// Plan the destruction of every recorded instance, dependents first.
pub fn plan_destroy(state: &StateMap, providers: &ProviderRegistry) -> Result<Plan, EngineError> {
  let mut graph = DependencyGraph::new();
  let mut changes = BTreeMap::new();
  let all: BTreeSet<Address> = state.keys().cloned().collect();
  add_destroys(&mut graph, &mut changes, state, &all, providers)?;

  Ok(Plan {
    composition: Composition::default(),
    graph,
    changes,
    values: Values::new(),
  })
}

fn add_destroys(
  graph: &mut DependencyGraph,
  changes: &mut BTreeMap<Address, PlannedChange>,
  state: &StateMap,
  destroyed: &BTreeSet<Address>,
  providers: &ProviderRegistry,
) -> Result<(), EngineError> {
  for address in destroyed {
    let Some(record) = state.get(address) else {
      continue;
    };
    require_provider(providers, &record.kind, address)?;
    graph.add_node(NodeId::Instance(address.clone()));
    changes.insert(
      address.clone(),
      PlannedChange {
        address: address.clone(),
        action: Action::Destroy,
        kind: record.kind.clone(),
        prior: Some(record.clone()),
        desired: BTreeMap::new(),
      },
    );
  }

  // A destroy waits for everything that depended on the destroyed instance.
  for (address, record) in state {
    let dependent = NodeId::Instance(address.clone());
    if !graph.contains(&dependent) {
      continue;
    }
    for dependency in record.dependencies.iter().filter(|d| destroyed.contains(*d)) {
      if dependency != address {
        graph.add_edge(dependent.clone(), NodeId::Instance(dependency.clone()));
      }
    }
  }

  graph.detect_cycle()?;
  Ok(())
}

fn require_provider(
  providers: &ProviderRegistry,
  kind: &str,
  address: &Address,
) -> Result<(), EngineError> {
  if providers.contains(kind) {
    Ok(())
  } else {
    Err(EngineError::ProviderNotFound {
      kind: kind.to_string(),
      address: address.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use serde_json::json;
  use trellis_graph::InstanceKey;

  fn record(kind: &str, attrs: serde_json::Value, dependencies: Vec<Address>) -> StateRecord {
    StateRecord {
      kind: kind.to_string(),
      id: "id-1".to_string(),
      attrs: attrs.as_object().cloned().unwrap_or_default(),
      computed_attrs: serde_json::Map::new(),
      dependencies,
      updated_at: Utc::now(),
    }
  }

  fn desired(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect()
  }

  #[test]
  fn test_diff() {
    let attrs = desired(&[("name", Value::from("web")), ("size", Value::from(2.0))]);
    let same = record("null", json!({"name": "web", "size": 2}), vec![]);
    let changed = record("null", json!({"name": "web", "size": 3}), vec![]);
    let other_kind = record("vm", json!({"name": "web", "size": 2}), vec![]);

    assert_eq!(diff("null", &attrs, None), Action::Create);
    assert_eq!(diff("null", &attrs, Some(&same)), Action::NoOp);
    assert_eq!(diff("null", &attrs, Some(&changed)), Action::Update);
    assert_eq!(diff("null", &attrs, Some(&other_kind)), Action::Replace);

    let unknown = desired(&[("name", Value::from("web")), ("size", Value::Unknown)]);
    assert_eq!(diff("null", &unknown, Some(&same)), Action::Update);
  }

  #[test]
  fn test_record_value_exposes_id_and_computed_attrs() {
    let mut rec = record("null", json!({"name": "web"}), vec![]);
    rec.computed_attrs = json!({"ip": "10.0.0.1"}).as_object().cloned().unwrap();

    let value = record_value(&rec);
    let object = value.as_map().unwrap();
    assert_eq!(object.get("name"), Some(&Value::from("web")));
    assert_eq!(object.get("id"), Some(&Value::from("id-1")));
    assert_eq!(
      object.get("computed_attrs").and_then(|c| c.as_map()).and_then(|c| c.get("ip")),
      Some(&Value::from("10.0.0.1"))
    );
  }

  #[test]
  fn test_plan_destroy_orders_dependents_first() {
    let db = Address::root("db");
    let web = Address::root("web").with_key(InstanceKey::Index(0));
    let mut state = StateMap::new();
    state.insert(db.clone(), record("null", json!({}), vec![]));
    state.insert(web.clone(), record("null", json!({}), vec![db.clone()]));

    let plan = plan_destroy(&state, &ProviderRegistry::with_builtins()).unwrap();
    assert_eq!(plan.counts().destroy, 2);
    assert!(!plan.is_empty());

    let order = plan.graph().topological_order().unwrap();
    assert_eq!(
      order,
      vec![NodeId::Instance(web), NodeId::Instance(db)]
    );
  }

  #[test]
  fn test_plan_destroy_requires_provider() {
    let mut state = StateMap::new();
    state.insert(Address::root("vm"), record("aws_instance", json!({}), vec![]));

    let err = plan_destroy(&state, &ProviderRegistry::with_builtins()).unwrap_err();
    assert!(matches!(
      err,
      EngineError::ProviderNotFound { kind, address } if kind == "aws_instance" && address == "vm"
    ));
  }

  #[test]
  fn test_empty_plan_renders_summary() {
    let plan = plan_destroy(&StateMap::new(), &ProviderRegistry::new()).unwrap();
    assert!(plan.is_empty());
    assert_eq!(
      plan.to_string(),
      "Plan: 0 to create, 0 to update, 0 to replace, 0 to destroy."
    );
  }
}
