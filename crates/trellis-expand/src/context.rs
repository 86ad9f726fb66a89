use std::collections::BTreeMap;

use trellis_config::InputType;
use trellis_expr::{Expr, Scope, Value, evaluate};
use trellis_graph::{
  Address, ExpandedUnit, Expansion, InstanceKey, IterationSpec, NodeId, ResourceInstance,
};

use crate::error::{ExpandError, unit_label};
use crate::values::Values;

/// Build the scope expressions of the unit at `path` are evaluated in.
///
/// Binds `var` from the unit's input nodes, every template name from its
/// instances' current values, `unit` from nested units' outputs and `local`
/// by evaluating each local in order. Templates and units that have not been
/// expanded yet read as unknown.
pub fn unit_scope(
  expansion: &Expansion,
  path: &[String],
  values: &Values,
) -> Result<Scope<'static>, ExpandError> {
  let expanded = expansion
    .unit(path)
    .ok_or_else(|| ExpandError::UnknownUnit(unit_label(path)))?;
  let unit = &expanded.unit;

  let mut scope = Scope::new();

  let vars = unit
    .inputs
    .keys()
    .map(|name| (name.clone(), values.value_of(&NodeId::input(path, name))))
    .collect::<BTreeMap<_, _>>();
  scope.bind("var", Value::Map(vars));

  for template in &unit.templates {
    scope.bind(template.name.clone(), template_value(expanded, &template.name, &template.iteration, values));
  }

  let mut units = BTreeMap::new();
  for call in &unit.calls {
    let mut child_path = path.to_vec();
    child_path.push(call.name.clone());
    let outputs = match expansion.unit(&child_path) {
      Some(child) => Value::Map(
        child
          .unit
          .outputs
          .keys()
          .map(|name| (name.clone(), values.value_of(&NodeId::output(&child_path, name))))
          .collect(),
      ),
      None => Value::Unknown,
    };
    units.insert(call.name.clone(), outputs);
  }
  scope.bind("unit", Value::Map(units));

  let mut locals = BTreeMap::new();
  scope.bind("local", Value::Map(locals.clone()));
  for (name, expr) in &unit.locals {
    let value = evaluate(expr, &scope).map_err(|error| ExpandError::Eval {
      location: format!("{}local.{name}", path_prefix(path)),
      error,
    })?;
    locals.insert(name.clone(), value);
    scope.bind("local", Value::Map(locals.clone()));
  }

  Ok(scope)
}

/// Value of a template symbol: the single instance, a list of count
/// instances in index order or a map of for_each instances by key.
fn template_value(
  expanded: &ExpandedUnit,
  name: &str,
  iteration: &IterationSpec,
  values: &Values,
) -> Value {
  let Some(addresses) = expanded.templates.get(name) else {
    return Value::Unknown;
  };
  let value = |address: &Address| values.value_of(&NodeId::Instance(address.clone()));

  match iteration {
    IterationSpec::None => addresses.first().map(value).unwrap_or(Value::Unknown),
    IterationSpec::Count(_) => Value::List(addresses.iter().map(value).collect()),
    IterationSpec::ForEach(_) => Value::Map(
      addresses
        .iter()
        .filter_map(|address| match &address.key {
          InstanceKey::Key(key) => Some((key.clone(), value(address))),
          _ => None,
        })
        .collect(),
    ),
  }
}

/// Evaluate an expression in a scope, labelling failures with `location`.
pub(crate) fn eval_at(expr: &Expr, scope: &Scope<'_>, location: impl FnOnce() -> String) -> Result<Value, ExpandError> {
  evaluate(expr, scope).map_err(|error| ExpandError::Eval {
    location: location(),
    error,
  })
}

/// Evaluate an instance's attributes against the current values.
pub fn evaluate_attributes(
  expansion: &Expansion,
  values: &Values,
  instance: &ResourceInstance,
) -> Result<BTreeMap<String, Value>, ExpandError> {
  let address = &instance.address;
  let expanded = expansion
    .unit(&address.unit_path)
    .ok_or_else(|| ExpandError::UnknownUnit(unit_label(&address.unit_path)))?;
  let Some(template) = expanded.unit.template(&address.template) else {
    return Ok(instance.attributes.clone());
  };

  let scope = unit_scope(expansion, &address.unit_path, values)?;
  let mut scope = scope.child();
  instance.bindings.bind(&mut scope);

  template
    .attributes
    .iter()
    .map(|(name, expr)| {
      let value = eval_at(expr, &scope, || format!("{address}.{name}"))?;
      Ok((name.clone(), value))
    })
    .collect()
}

/// Evaluate a unit input or output node against the current values.
///
/// Inputs are evaluated in the calling unit's scope and type-checked once
/// known. Instance nodes return their current value.
pub fn evaluate_node(
  expansion: &Expansion,
  values: &Values,
  node: &NodeId,
) -> Result<Value, ExpandError> {
  match node {
    NodeId::Instance(_) => Ok(values.value_of(node)),
    NodeId::Input { unit_path, name } => {
      let Some((call_name, parent_path)) = unit_path.split_last() else {
        return Ok(values.value_of(node));
      };
      let expanded = expansion
        .unit(unit_path)
        .ok_or_else(|| ExpandError::UnknownUnit(unit_label(unit_path)))?;
      let Some(input) = expanded.unit.inputs.get(name) else {
        return Err(ExpandError::UnknownInput {
          unit: unit_label(unit_path),
          name: name.clone(),
        });
      };

      let bound = expansion
        .unit(parent_path)
        .and_then(|parent| parent.unit.call(call_name))
        .and_then(|call| call.inputs.get(name));

      let value = match (bound, &input.default) {
        (Some(expr), _) => {
          let scope = unit_scope(expansion, parent_path, values)?;
          eval_at(expr, &scope, || node.to_string())?
        }
        (None, Some(default)) => eval_at(default, &Scope::new(), || node.to_string())?,
        (None, None) => {
          return Err(ExpandError::MissingRequiredInput {
            unit: unit_label(unit_path),
            name: name.clone(),
          });
        }
      };

      check_input_type(unit_path, name, input.input_type, &value)?;
      Ok(value)
    }
    NodeId::Output { unit_path, name } => {
      let expanded = expansion
        .unit(unit_path)
        .ok_or_else(|| ExpandError::UnknownUnit(unit_label(unit_path)))?;
      let Some(expr) = expanded.unit.outputs.get(name) else {
        return Ok(Value::Unknown);
      };
      let scope = unit_scope(expansion, unit_path, values)?;
      eval_at(expr, &scope, || node.to_string())
    }
  }
}

/// Check a value against a declared input type. Unknown values pass; they
/// are checked again once known.
pub fn check_input_type(
  unit_path: &[String],
  name: &str,
  expected: InputType,
  value: &Value,
) -> Result<(), ExpandError> {
  let matches = match (expected, value) {
    (_, Value::Unknown) | (InputType::Any, _) => true,
    (InputType::String, Value::String(_)) => true,
    (InputType::Number, Value::Number(_)) => true,
    (InputType::Bool, Value::Bool(_)) => true,
    (InputType::List, Value::List(_)) => true,
    (InputType::Map, Value::Map(_)) => true,
    _ => false,
  };
  if matches {
    Ok(())
  } else {
    Err(ExpandError::InputType {
      unit: unit_label(unit_path),
      name: name.to_string(),
      expected,
      actual: value.type_name(),
    })
  }
}

pub(crate) fn path_prefix(path: &[String]) -> String {
  path.iter().map(|s| format!("{s}.")).collect()
}
