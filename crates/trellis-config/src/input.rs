use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::ExprValue;

/// Declared type of a unit input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
  String,
  Number,
  Bool,
  List,
  Map,
  #[default]
  Any,
}

impl fmt::Display for InputType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      InputType::String => "string",
      InputType::Number => "number",
      InputType::Bool => "bool",
      InputType::List => "list",
      InputType::Map => "map",
      InputType::Any => "any",
    };
    f.write_str(name)
  }
}

/// A declared input of a configuration unit (a variable for the root unit).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDef {
  #[serde(rename = "type", default)]
  pub input_type: InputType,
  /// Value used when the caller does not bind the input. Inputs without a
  /// default are required.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default: Option<ExprValue>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}
