use std::collections::BTreeMap;
use std::sync::Arc;

use trellis_expr::{Scope, Value};
use trellis_graph::{Configuration, ConfigurationUnit, ExpandedUnit, Expansion, NodeId, UnitItem};

use crate::context::{check_input_type, eval_at, unit_scope};
use crate::error::{ExpandError, unit_label};
use crate::expander::expand;
use crate::values::Values;

/// The instance set of a configuration together with the values computed
/// while expanding it.
#[derive(Debug, Clone, Default)]
pub struct Composition {
  pub expansion: Expansion,
  pub values: Values,
}

impl Composition {
  /// Evaluated outputs of the unit at `path`; may contain unknowns.
  pub fn outputs(&self, path: &[String]) -> BTreeMap<String, Value> {
    let Some(unit) = self.expansion.unit(path) else {
      return BTreeMap::new();
    };
    unit
      .unit
      .outputs
      .keys()
      .map(|name| (name.clone(), self.values.value_of(&NodeId::output(path, name))))
      .collect()
  }
}

/// Compose a configuration: bind the run variables to the root unit's
/// inputs, expand every template and nested unit, evaluate outputs and link
/// instance dependencies.
pub fn compose(
  configuration: &Configuration,
  variables: BTreeMap<String, Value>,
) -> Result<Composition, ExpandError> {
  let mut composition = Composition::default();
  compose_unit(
    &mut composition,
    Vec::new(),
    Arc::clone(&configuration.root),
    variables,
  )?;
  composition.expansion.link_dependencies();
  Ok(composition)
}

/// Compose one unit at `path` with its bound input values.
///
/// Instances come back namespaced by `path`; outputs are stored as values of
/// the unit's output nodes.
pub fn compose_unit(
  composition: &mut Composition,
  path: Vec<String>,
  unit: Arc<ConfigurationUnit>,
  mut bound: BTreeMap<String, Value>,
) -> Result<(), ExpandError> {
  if let Some(name) = bound.keys().find(|name| !unit.inputs.contains_key(*name)) {
    return Err(ExpandError::UnknownInput {
      unit: unit_label(&path),
      name: name.clone(),
    });
  }

  for (name, input) in &unit.inputs {
    let value = match (bound.remove(name), &input.default) {
      (Some(value), _) => value,
      (None, Some(default)) => eval_at(default, &Scope::new(), || {
        format!("{}.inputs.{name}", unit_label(&path))
      })?,
      (None, None) => {
        return Err(ExpandError::MissingRequiredInput {
          unit: unit_label(&path),
          name: name.clone(),
        });
      }
    };
    check_input_type(&path, name, input.input_type, &value)?;
    composition.values.set(NodeId::input(&path, name), value);
  }

  composition
    .expansion
    .units
    .insert(path.clone(), ExpandedUnit::new(path.clone(), Arc::clone(&unit)));

  for item in &unit.order {
    match *item {
      // Locals are evaluated whenever a scope is built.
      UnitItem::Local(_) => {}
      UnitItem::Template(i) => {
        let Some(template) = unit.templates.get(i) else {
          continue;
        };
        let scope = unit_scope(&composition.expansion, &path, &composition.values)?;
        let instances = expand(template, &path, &scope)?;

        let addresses = instances.iter().map(|i| i.address.clone()).collect();
        if let Some(expanded) = composition.expansion.units.get_mut(&path) {
          expanded.templates.insert(template.name.clone(), addresses);
        }
        for instance in instances {
          composition
            .values
            .set(NodeId::Instance(instance.address.clone()), instance.placeholder());
          composition
            .expansion
            .instances
            .insert(instance.address.clone(), instance);
        }
      }
      UnitItem::Call(i) => {
        let Some(call) = unit.calls.get(i) else {
          continue;
        };
        let scope = unit_scope(&composition.expansion, &path, &composition.values)?;
        let mut child_path = path.clone();
        child_path.push(call.name.clone());

        let mut inputs = BTreeMap::new();
        for (name, expr) in &call.inputs {
          let value = eval_at(expr, &scope, || NodeId::input(&child_path, name).to_string())?;
          inputs.insert(name.clone(), value);
        }

        compose_unit(composition, child_path, Arc::clone(&call.unit), inputs)?;
      }
    }
  }

  let scope = unit_scope(&composition.expansion, &path, &composition.values)?;
  for (name, expr) in &unit.outputs {
    let node = NodeId::output(&path, name);
    let value = eval_at(expr, &scope, || node.to_string())?;
    composition.values.set(node, value);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use trellis_config::UnitDef;
  use trellis_graph::{Address, GraphError, InstanceKey, build};
  use trellis_resolver::{Resolver, StandardResolver};
  use trellis_unit_registry::MemoryUnitRegistry;

  async fn resolve_with(registry: MemoryUnitRegistry, def: serde_json::Value) -> Configuration {
    let def: UnitDef = serde_json::from_value(def).unwrap();
    StandardResolver::new(registry).resolve(def).await.unwrap()
  }

  async fn resolve(def: serde_json::Value) -> Configuration {
    resolve_with(MemoryUnitRegistry::new(), def).await
  }

  fn instance(path: &[&str], template: &str, key: InstanceKey) -> Address {
    let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
    Address::new(&path, template, key)
  }

  #[tokio::test]
  async fn test_count_template_has_no_internal_edges() {
    let config = resolve(json!({
      "resources": [{
        "name": "T",
        "kind": "null",
        "count": 3,
        "attributes": { "name": "x-${count.index}" }
      }]
    }))
    .await;

    let composition = compose(&config, BTreeMap::new()).unwrap();
    let graph = build(&composition.expansion).unwrap();

    for i in 0..3 {
      let address = instance(&[], "T", InstanceKey::Index(i));
      let t = composition.expansion.instance(&address).unwrap();
      assert_eq!(t.attributes["name"], Value::from(format!("x-{i}")));
      assert!(graph.dependencies(&NodeId::Instance(address)).is_empty());
    }
    assert_eq!(graph.edges().count(), 0);
  }

  #[tokio::test]
  async fn test_literal_key_reference_creates_single_edge() {
    let config = resolve(json!({
      "resources": [
        { "name": "A", "kind": "null", "for_each": { "a": 1, "b": 2 } },
        { "name": "B", "kind": "null", "attributes": { "v": "${A[\"a\"].computed_attrs.value}" } }
      ]
    }))
    .await;

    let composition = compose(&config, BTreeMap::new()).unwrap();
    let graph = build(&composition.expansion).unwrap();

    let b = NodeId::Instance(Address::root("B"));
    let a = NodeId::Instance(instance(&[], "A", InstanceKey::Key("a".into())));
    assert_eq!(graph.dependencies(&b), &[a]);
    assert_eq!(graph.edges().count(), 1);
    assert!(composition.expansion.instance(&Address::root("B")).unwrap().attributes["v"].is_unknown());
  }

  #[tokio::test]
  async fn test_computed_index_depends_on_whole_template() {
    let config = resolve(json!({
      "inputs": { "pick": { "default": 1 } },
      "resources": [
        { "name": "A", "kind": "null", "count": 3 },
        { "name": "B", "kind": "null", "attributes": { "v": "${A[var.pick].id}" } },
        { "name": "C", "kind": "null", "attributes": { "v": "${length(A)}" } }
      ]
    }))
    .await;

    let composition = compose(&config, BTreeMap::new()).unwrap();
    let graph = build(&composition.expansion).unwrap();
    assert_eq!(graph.dependencies(&NodeId::Instance(Address::root("B"))).len(), 3);
    assert_eq!(graph.dependencies(&NodeId::Instance(Address::root("C"))).len(), 3);

    // length() is known even though A's ids are not.
    let c = composition.expansion.instance(&Address::root("C")).unwrap();
    assert_eq!(c.attributes["v"], Value::from(3i64));
  }

  #[tokio::test]
  async fn test_cycle_between_templates() {
    let config = resolve(json!({
      "resources": [
        { "name": "A", "kind": "null", "attributes": { "v": "${B.id}" } },
        { "name": "B", "kind": "null", "attributes": { "v": "${A.id}" } }
      ]
    }))
    .await;

    let composition = compose(&config, BTreeMap::new()).unwrap();
    match build(&composition.expansion) {
      Err(GraphError::Cycle { path }) => {
        assert!(path.contains(&NodeId::Instance(Address::root("A"))));
        assert!(path.contains(&NodeId::Instance(Address::root("B"))));
      }
      other => panic!("expected cycle, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_locals_are_followed_and_depends_on_adds_ordering() {
    let config = resolve(json!({
      "locals": { "db_id": "${db.id}" },
      "resources": [
        { "name": "db", "kind": "null" },
        { "name": "cache", "kind": "null" },
        {
          "name": "app",
          "kind": "null",
          "attributes": { "db": "${local.db_id}" },
          "depends_on": ["cache"]
        }
      ]
    }))
    .await;

    let composition = compose(&config, BTreeMap::new()).unwrap();
    let app = composition.expansion.instance(&Address::root("app")).unwrap();
    assert_eq!(
      app.dependencies["db"].iter().collect::<Vec<_>>(),
      vec![&NodeId::Instance(Address::root("db"))]
    );
    assert!(app.ordering.contains(&NodeId::Instance(Address::root("cache"))));
    assert!(app.attributes["db"].is_unknown());
  }

  #[tokio::test]
  async fn test_nested_unit_boundaries() {
    let network: UnitDef = serde_json::from_value(json!({
      "inputs": {
        "cidr": { "type": "string" },
        "zones": { "type": "list", "default": ["a", "b"] }
      },
      "resources": [{
        "name": "subnet",
        "kind": "null",
        "for_each": "${toset(var.zones)}",
        "attributes": { "zone": "${each.key}", "cidr": "${var.cidr}" }
      }],
      "outputs": { "first_subnet": "${subnet[\"a\"].id}", "cidr": "${var.cidr}" }
    }))
    .unwrap();
    let registry = MemoryUnitRegistry::new().with_unit("network", network);

    let config = resolve_with(
      registry,
      json!({
        "resources": [
          { "name": "vpc", "kind": "null", "attributes": { "cidr": "10.0.0.0/16" } },
          { "name": "app", "kind": "null", "attributes": { "subnet": "${unit.net.first_subnet}" } }
        ],
        "units": [{ "name": "net", "source": "network", "inputs": { "cidr": "${vpc.cidr}" } }],
        "outputs": { "net_cidr": "${unit.net.cidr}" }
      }),
    )
    .await;

    let composition = compose(&config, BTreeMap::new()).unwrap();
    let graph = build(&composition.expansion).unwrap();
    let net = vec!["net".to_string()];

    let subnet_a = instance(&["net"], "subnet", InstanceKey::Key("a".into()));
    assert_eq!(subnet_a.to_string(), r#"net.subnet["a"]"#);
    let subnet = composition.expansion.instance(&subnet_a).unwrap();
    assert_eq!(subnet.attributes["cidr"], Value::from("10.0.0.0/16"));
    assert_eq!(subnet.attributes["zone"], Value::from("a"));

    // The subnet reads the input node, which reads the parent's vpc.
    let cidr_input = NodeId::input(&net, "cidr");
    assert_eq!(graph.dependencies(&NodeId::Instance(subnet_a.clone())), &[cidr_input.clone()]);
    assert_eq!(
      graph.dependencies(&cidr_input),
      &[NodeId::Instance(Address::root("vpc"))]
    );

    // The parent reads the output node, which reads the internal instance.
    let output = NodeId::output(&net, "first_subnet");
    assert_eq!(graph.dependencies(&NodeId::Instance(Address::root("app"))), &[output.clone()]);
    assert_eq!(graph.dependencies(&output), &[NodeId::Instance(subnet_a)]);

    assert_eq!(composition.outputs(&[])["net_cidr"], Value::from("10.0.0.0/16"));
  }

  #[tokio::test]
  async fn test_unit_input_validation() {
    let registry = || MemoryUnitRegistry::new().with_unit("network", network_unit_simple());

    let missing = resolve_with(
      registry(),
      json!({ "units": [{ "name": "net", "source": "network" }] }),
    )
    .await;
    assert!(matches!(
      compose(&missing, BTreeMap::new()),
      Err(ExpandError::MissingRequiredInput { unit, name }) if unit == "net" && name == "cidr"
    ));

    let wrong_type = resolve_with(
      registry(),
      json!({ "units": [{ "name": "net", "source": "network", "inputs": { "cidr": 10 } }] }),
    )
    .await;
    assert!(matches!(
      compose(&wrong_type, BTreeMap::new()),
      Err(ExpandError::InputType { actual: "number", .. })
    ));

    let unknown = resolve_with(
      registry(),
      json!({ "units": [{ "name": "net", "source": "network", "inputs": { "cidr": "x", "extra": 1 } }] }),
    )
    .await;
    assert!(matches!(
      compose(&unknown, BTreeMap::new()),
      Err(ExpandError::UnknownInput { name, .. }) if name == "extra"
    ));
  }

  #[tokio::test]
  async fn test_root_variables() {
    let config = resolve(json!({
      "inputs": { "replicas": { "type": "number" } },
      "resources": [{ "name": "web", "kind": "null", "count": "${var.replicas}" }]
    }))
    .await;

    let vars = BTreeMap::from([("replicas".to_string(), Value::from(2i64))]);
    let composition = compose(&config, vars).unwrap();
    assert_eq!(composition.expansion.instances.len(), 2);

    assert!(matches!(
      compose(&config, BTreeMap::new()),
      Err(ExpandError::MissingRequiredInput { .. })
    ));
  }

  #[tokio::test]
  async fn test_iteration_over_apply_time_value_is_unresolvable() {
    let config = resolve(json!({
      "resources": [
        { "name": "A", "kind": "null" },
        { "name": "B", "kind": "null", "count": "${length(A.computed_attrs)}" }
      ]
    }))
    .await;

    assert!(matches!(
      compose(&config, BTreeMap::new()),
      Err(ExpandError::UnresolvableIteration { .. })
    ));
  }

  fn network_unit_simple() -> UnitDef {
    serde_json::from_value(json!({
      "inputs": { "cidr": { "type": "string" } },
      "resources": [{ "name": "vpc", "kind": "null", "attributes": { "cidr": "${var.cidr}" } }]
    }))
    .unwrap()
  }
}
