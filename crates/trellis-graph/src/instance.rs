use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use trellis_expr::{Scope, Value};

use crate::address::{Address, NodeId};
use crate::unit::ConfigurationUnit;

/// Per-instance iteration symbols.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Bindings {
  #[default]
  None,
  Count { index: usize },
  Each { key: String, value: Value },
}

impl Bindings {
  /// Bind `count` or `each` into a per-instance scope.
  pub fn bind(&self, scope: &mut Scope<'_>) {
    match self {
      Bindings::None => {}
      Bindings::Count { index } => {
        let count = BTreeMap::from([("index".to_string(), Value::from(*index as i64))]);
        scope.bind("count", Value::Map(count));
      }
      Bindings::Each { key, value } => {
        let each = BTreeMap::from([
          ("key".to_string(), Value::from(key.as_str())),
          ("value".to_string(), value.clone()),
        ]);
        scope.bind("each", Value::Map(each));
      }
    }
  }
}

/// One concrete, uniquely keyed expansion of a resource template.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInstance {
  pub address: Address,
  pub kind: String,
  pub bindings: Bindings,
  /// Attribute values resolved so far; may contain unknowns.
  pub attributes: BTreeMap<String, Value>,
  /// Nodes each attribute's expression reads from.
  pub dependencies: BTreeMap<String, BTreeSet<NodeId>>,
  /// Nodes this instance follows because of `depends_on`.
  pub ordering: BTreeSet<NodeId>,
  pub timeout_ms: Option<u64>,
}

impl ResourceInstance {
  /// Every node this instance must follow.
  pub fn all_dependencies(&self) -> BTreeSet<NodeId> {
    self
      .dependencies
      .values()
      .flatten()
      .chain(self.ordering.iter())
      .cloned()
      .collect()
  }

  /// The value other expressions see for this instance before it is
  /// applied: its configured attributes with `id` and `computed_attrs`
  /// unknown.
  pub fn placeholder(&self) -> Value {
    instance_object(self.attributes.clone(), Value::Unknown, Value::Unknown)
  }
}

/// Build the value an instance exposes to expressions.
pub fn instance_object(
  attributes: BTreeMap<String, Value>,
  id: Value,
  computed_attrs: Value,
) -> Value {
  let mut object = attributes;
  object.insert("id".to_string(), id);
  object.insert("computed_attrs".to_string(), computed_attrs);
  Value::Map(object)
}

/// A unit placed at a path of the configuration tree.
#[derive(Debug, Clone)]
pub struct ExpandedUnit {
  pub path: Vec<String>,
  pub unit: Arc<ConfigurationUnit>,
  /// Instance addresses per expanded template, in key order.
  pub templates: BTreeMap<String, Vec<Address>>,
}

impl ExpandedUnit {
  pub fn new(path: Vec<String>, unit: Arc<ConfigurationUnit>) -> Self {
    Self {
      path,
      unit,
      templates: BTreeMap::new(),
    }
  }

  /// Path of the unit that called this one; `None` for the root.
  pub fn parent_path(&self) -> Option<&[String]> {
    self.path.split_last().map(|(_, parent)| parent)
  }
}

/// The complete instance set of a configuration.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
  pub units: BTreeMap<Vec<String>, ExpandedUnit>,
  pub instances: BTreeMap<Address, ResourceInstance>,
}

impl Expansion {
  pub fn unit(&self, path: &[String]) -> Option<&ExpandedUnit> {
    self.units.get(path)
  }

  pub fn instance(&self, address: &Address) -> Option<&ResourceInstance> {
    self.instances.get(address)
  }

  /// Addresses of a template's instances, or `None` if the template has not
  /// been expanded.
  pub fn instances_of(&self, unit_path: &[String], template: &str) -> Option<&[Address]> {
    self
      .units
      .get(unit_path)
      .and_then(|unit| unit.templates.get(template))
      .map(Vec::as_slice)
  }

  /// Record the dependencies of every instance from its attribute
  /// expressions and `depends_on` list.
  pub fn link_dependencies(&mut self) {
    let linked: Vec<_> = self
      .instances
      .values()
      .map(|instance| {
        let (dependencies, ordering) = crate::deps::instance_dependencies(self, instance);
        (instance.address.clone(), dependencies, ordering)
      })
      .collect();

    for (address, dependencies, ordering) in linked {
      if let Some(instance) = self.instances.get_mut(&address) {
        instance.dependencies = dependencies;
        instance.ordering = ordering;
      }
    }
  }
}
