use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Error as _, Serialize, Serializer};

/// A dynamically typed expression value.
///
/// `Unknown` stands for a value that cannot be computed yet because it depends
/// on an attribute of a resource instance that has not been applied. Unknowns
/// propagate through every operation that consumes them.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Number(f64),
  String(String),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
  Unknown,
}

impl Value {
  /// Human readable type name, used in error messages.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Number(_) => "number",
      Value::String(_) => "string",
      Value::List(_) => "list",
      Value::Map(_) => "map",
      Value::Unknown => "unknown",
    }
  }

  pub fn is_unknown(&self) -> bool {
    matches!(self, Value::Unknown)
  }

  /// Returns true if no `Unknown` appears anywhere inside this value.
  pub fn is_wholly_known(&self) -> bool {
    match self {
      Value::Unknown => false,
      Value::List(items) => items.iter().all(Value::is_wholly_known),
      Value::Map(entries) => entries.values().all(Value::is_wholly_known),
      _ => true,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Map(m) => Some(m),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(l) => Some(l),
      _ => None,
    }
  }

  /// Interpret the value as a non-negative integer index.
  pub fn as_index(&self) -> Option<usize> {
    match self {
      Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
      _ => None,
    }
  }

  /// Render a primitive as the string used for interpolation.
  ///
  /// Returns `None` for collections and unknowns, which cannot be interpolated.
  pub fn to_interpolated(&self) -> Option<String> {
    match self {
      Value::Null => Some(String::new()),
      Value::Bool(b) => Some(b.to_string()),
      Value::Number(n) => Some(format_number(*n)),
      Value::String(s) => Some(s.clone()),
      Value::List(_) | Value::Map(_) | Value::Unknown => None,
    }
  }

  /// Convert into JSON. Fails if the value contains an unknown.
  pub fn to_json(&self) -> Option<serde_json::Value> {
    Some(match self {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(*b),
      Value::Number(n) => number_to_json(*n),
      Value::String(s) => serde_json::Value::String(s.clone()),
      Value::List(items) => serde_json::Value::Array(
        items
          .iter()
          .map(Value::to_json)
          .collect::<Option<Vec<_>>>()?,
      ),
      Value::Map(entries) => serde_json::Value::Object(
        entries
          .iter()
          .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
          .collect::<Option<serde_json::Map<_, _>>>()?,
      ),
      Value::Unknown => return None,
    })
  }
}

/// Format a number the way it appears in interpolated strings: integers
/// without a fractional part.
pub(crate) fn format_number(n: f64) -> String {
  if n.fract() == 0.0 && n.abs() < 1e15 {
    format!("{}", n as i64)
  } else {
    format!("{}", n)
  }
}

fn number_to_json(n: f64) -> serde_json::Value {
  if n.fract() == 0.0 && n.abs() < 1e15 {
    serde_json::Value::Number((n as i64).into())
  } else {
    serde_json::Number::from_f64(n)
      .map(serde_json::Value::Number)
      .unwrap_or(serde_json::Value::Null)
  }
}

impl From<serde_json::Value> for Value {
  fn from(json: serde_json::Value) -> Self {
    match json {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
      serde_json::Value::String(s) => Value::String(s),
      serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
      serde_json::Value::Object(entries) => Value::Map(
        entries
          .into_iter()
          .map(|(k, v)| (k, Value::from(v)))
          .collect(),
      ),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Number(n)
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Number(n as f64)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<BTreeMap<String, Value>> for Value {
  fn from(m: BTreeMap<String, Value>) -> Self {
    Value::Map(m)
  }
}

impl From<Vec<Value>> for Value {
  fn from(l: Vec<Value>) -> Self {
    Value::List(l)
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Unknown => write!(f, "(known after apply)"),
      Value::String(s) => write!(f, "{:?}", s),
      other => match other.to_json() {
        Some(json) => write!(f, "{}", json),
        None => write!(f, "(known after apply)"),
      },
    }
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self.to_json() {
      Some(json) => json.serialize(serializer),
      None => Err(S::Error::custom("cannot serialize an unknown value")),
    }
  }
}

impl<'de> Deserialize<'de> for Value {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    serde_json::Value::deserialize(deserializer).map(Value::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_json_conversion_keeps_integers() {
    let value = Value::from(json!({"count": 3, "ratio": 0.5, "tags": ["a", "b"]}));
    let back = value.to_json().unwrap();
    assert_eq!(back, json!({"count": 3, "ratio": 0.5, "tags": ["a", "b"]}));
  }

  #[test]
  fn test_unknown_is_not_wholly_known() {
    let value = Value::List(vec![Value::from("a"), Value::Unknown]);
    assert!(!value.is_wholly_known());
    assert!(value.to_json().is_none());
    assert!(serde_json::to_string(&value).is_err());
  }

  #[test]
  fn test_interpolated_number_format() {
    assert_eq!(Value::Number(2.0).to_interpolated().unwrap(), "2");
    assert_eq!(Value::Number(2.5).to_interpolated().unwrap(), "2.5");
    assert!(Value::List(vec![]).to_interpolated().is_none());
  }
}
