use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::expr::ExprValue;

/// A resource template definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
  /// Template name, unique within its unit.
  pub name: String,
  /// Resource kind, handed to the provider registry as-is.
  pub kind: String,
  #[serde(default)]
  pub attributes: BTreeMap<String, ExprValue>,
  /// Expands the template into `count` instances keyed by index.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub count: Option<ExprValue>,
  /// Expands the template into one instance per key of a map or set.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub for_each: Option<ExprValue>,
  /// Names of sibling templates that must be applied first.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}
