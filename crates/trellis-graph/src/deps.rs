use std::collections::{BTreeMap, BTreeSet, HashSet};

use trellis_expr::{Expr, Step, references};

use crate::address::{InstanceKey, NodeId};
use crate::instance::{Expansion, ResourceInstance};
use crate::template::IterationSpec;

/// Nodes an expression evaluated in the unit at `unit_path` reads from.
///
/// References through `local.<name>` are followed into the local's own
/// expression. A reference to a template with a literal index depends on
/// that one instance; any other reference to a template depends on all of
/// its instances.
pub fn expression_dependencies(
  expansion: &Expansion,
  unit_path: &[String],
  expr: &Expr,
) -> BTreeSet<NodeId> {
  let mut found = BTreeSet::new();
  let mut visited_locals = HashSet::new();
  collect(expansion, unit_path, expr, &mut found, &mut visited_locals);
  found
}

fn collect(
  expansion: &Expansion,
  unit_path: &[String],
  expr: &Expr,
  found: &mut BTreeSet<NodeId>,
  visited_locals: &mut HashSet<String>,
) {
  let Some(expanded) = expansion.unit(unit_path) else {
    return;
  };
  let unit = &expanded.unit;

  for reference in references(expr) {
    match reference.root.as_str() {
      "count" | "each" => {}
      "var" => {
        // Root inputs are run variables, known before anything is applied.
        if unit_path.is_empty() {
          continue;
        }
        match reference.attr_at(0) {
          Some(name) => {
            if unit.inputs.contains_key(name) {
              found.insert(NodeId::input(unit_path, name));
            }
          }
          None => found.extend(unit.inputs.keys().map(|name| NodeId::input(unit_path, name))),
        }
      }
      "local" => {
        let names: Vec<&str> = match reference.attr_at(0) {
          Some(name) => vec![name],
          None => unit.locals.iter().map(|(name, _)| name.as_str()).collect(),
        };
        for name in names {
          if !visited_locals.insert(name.to_string()) {
            continue;
          }
          if let Some(local) = unit.local(name) {
            collect(expansion, unit_path, local, found, visited_locals);
          }
        }
      }
      "unit" => {
        let calls: Vec<&str> = match reference.attr_at(0) {
          Some(call) => vec![call],
          None => unit.calls.iter().map(|c| c.name.as_str()).collect(),
        };
        for call in calls {
          let mut child_path = unit_path.to_vec();
          child_path.push(call.to_string());
          let Some(child) = expansion.unit(&child_path) else {
            continue;
          };
          let named = reference.attr_at(0).and(reference.attr_at(1));
          match named {
            Some(output) if child.unit.outputs.contains_key(output) => {
              found.insert(NodeId::output(&child_path, output));
            }
            _ => found.extend(
              child
                .unit
                .outputs
                .keys()
                .map(|name| NodeId::output(&child_path, name)),
            ),
          }
        }
      }
      template => {
        let Some(addresses) = expansion.instances_of(unit_path, template) else {
          continue;
        };
        let iteration = unit.template(template).map(|t| &t.iteration);
        let literal_key = match (reference.steps.first(), iteration) {
          (Some(Step::Index(Some(key))), Some(IterationSpec::Count(_))) => {
            key.as_index().map(InstanceKey::Index)
          }
          (Some(Step::Index(Some(key))), Some(IterationSpec::ForEach(_))) => {
            key.as_str().map(|k| InstanceKey::Key(k.to_string()))
          }
          _ => None,
        };
        match literal_key {
          // A literal key with no matching instance is reported by the
          // evaluator.
          Some(key) => found.extend(
            addresses
              .iter()
              .filter(|address| address.key == key)
              .cloned()
              .map(NodeId::Instance),
          ),
          None => found.extend(addresses.iter().cloned().map(NodeId::Instance)),
        }
      }
    }
  }
}

/// Per-attribute dependencies and `depends_on` ordering of an instance.
pub(crate) fn instance_dependencies(
  expansion: &Expansion,
  instance: &ResourceInstance,
) -> (BTreeMap<String, BTreeSet<NodeId>>, BTreeSet<NodeId>) {
  let unit_path = &instance.address.unit_path;
  let template = expansion
    .unit(unit_path)
    .and_then(|unit| unit.unit.template(&instance.address.template));
  let Some(template) = template else {
    return (BTreeMap::new(), BTreeSet::new());
  };

  let dependencies = template
    .attributes
    .iter()
    .map(|(name, expr)| {
      (
        name.clone(),
        expression_dependencies(expansion, unit_path, expr),
      )
    })
    .collect();

  let ordering = template
    .depends_on
    .iter()
    .filter_map(|name| expansion.instances_of(unit_path, name))
    .flatten()
    .cloned()
    .map(NodeId::Instance)
    .collect();

  (dependencies, ordering)
}
