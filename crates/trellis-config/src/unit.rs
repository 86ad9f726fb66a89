use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::expr::ExprValue;
use crate::input::InputDef;
use crate::resource::ResourceDef;

/// A configuration unit: a reusable bundle of resources with declared
/// inputs and outputs. The root configuration is a unit as well; its inputs
/// are the variables of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub inputs: BTreeMap<String, InputDef>,
  #[serde(default)]
  pub locals: BTreeMap<String, ExprValue>,
  #[serde(default)]
  pub resources: Vec<ResourceDef>,
  #[serde(default)]
  pub units: Vec<UnitCallDef>,
  #[serde(default)]
  pub outputs: BTreeMap<String, ExprValue>,
}

/// A call to a unit from inside another unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCallDef {
  /// Call name; becomes the path segment of every instance inside the unit.
  pub name: String,
  /// Name under which the unit is stored in the unit registry.
  pub source: String,
  #[serde(default)]
  pub inputs: BTreeMap<String, ExprValue>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::InputType;
  use serde_json::json;

  #[test]
  fn test_deserialize_unit() {
    let def: UnitDef = serde_json::from_value(json!({
      "inputs": {
        "env": { "type": "string", "default": "dev" },
        "replicas": { "type": "number" }
      },
      "locals": { "prefix": "${var.env}-app" },
      "resources": [
        {
          "name": "web",
          "kind": "null",
          "count": "${var.replicas}",
          "attributes": { "name": "${local.prefix}-${count.index}" },
          "depends_on": ["db"]
        },
        { "name": "db", "kind": "null" }
      ],
      "units": [
        { "name": "net", "source": "network", "inputs": { "cidr": "10.0.0.0/16" } }
      ],
      "outputs": { "first": "${web[0].id}" }
    }))
    .unwrap();

    assert_eq!(def.inputs["env"].input_type, InputType::String);
    assert_eq!(def.inputs["replicas"].input_type, InputType::Number);
    assert!(def.inputs["replicas"].default.is_none());
    assert_eq!(def.resources.len(), 2);
    assert_eq!(def.resources[0].depends_on, vec!["db".to_string()]);
    assert!(def.resources[1].count.is_none());
    assert!(def.resources[1].attributes.is_empty());
    assert_eq!(def.units[0].source, "network");
  }

  #[test]
  fn test_input_type_defaults_to_any() {
    let input: InputDef = serde_json::from_value(json!({})).unwrap();
    assert_eq!(input.input_type, InputType::Any);
  }
}
