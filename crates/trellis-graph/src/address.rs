use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GraphError;

/// The key distinguishing one instance of a template from its siblings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceKey {
  /// Single-instance template.
  None,
  /// Instance produced by `count`.
  Index(usize),
  /// Instance produced by `for_each`.
  Key(String),
}

impl fmt::Display for InstanceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InstanceKey::None => Ok(()),
      InstanceKey::Index(i) => write!(f, "[{i}]"),
      InstanceKey::Key(k) => write!(f, "[{}]", serde_json::Value::String(k.clone())),
    }
  }
}

/// Fully-qualified identity of a resource instance: unit path, template name
/// and instance key. Renders as `net.subnet["a"]`, `web[0]` or `db`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
  pub unit_path: Vec<String>,
  pub template: String,
  pub key: InstanceKey,
}

impl Address {
  pub fn new(unit_path: &[String], template: impl Into<String>, key: InstanceKey) -> Self {
    Self {
      unit_path: unit_path.to_vec(),
      template: template.into(),
      key,
    }
  }

  /// Address of a single-instance template in the root unit.
  pub fn root(template: impl Into<String>) -> Self {
    Self::new(&[], template, InstanceKey::None)
  }

  pub fn with_key(mut self, key: InstanceKey) -> Self {
    self.key = key;
    self
  }

  /// Whether this address and `other` name instances of the same template.
  pub fn same_template(&self, other: &Address) -> bool {
    self.unit_path == other.unit_path && self.template == other.template
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for segment in &self.unit_path {
      write!(f, "{segment}.")?;
    }
    write!(f, "{}{}", self.template, self.key)
  }
}

impl FromStr for Address {
  type Err = GraphError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || GraphError::InvalidAddress(s.to_string());

    let (path, key) = match s.find('[') {
      Some(pos) => {
        let inner = s[pos..]
          .strip_prefix('[')
          .and_then(|rest| rest.strip_suffix(']'))
          .ok_or_else(invalid)?;
        let key = if inner.starts_with('"') {
          let key: String = serde_json::from_str(inner).map_err(|_| invalid())?;
          InstanceKey::Key(key)
        } else {
          InstanceKey::Index(inner.parse().map_err(|_| invalid())?)
        };
        (&s[..pos], key)
      }
      None => (s, InstanceKey::None),
    };

    let mut segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
      return Err(invalid());
    }
    let template = segments.pop().ok_or_else(invalid)?;

    Ok(Address {
      unit_path: segments,
      template,
      key,
    })
  }
}

impl Serialize for Address {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Address {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// A node of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeId {
  Instance(Address),
  /// Input binding of a nested unit, evaluated in the parent's scope.
  Input { unit_path: Vec<String>, name: String },
  /// Output binding of a unit, evaluated in the unit's own scope.
  Output { unit_path: Vec<String>, name: String },
}

impl NodeId {
  pub fn input(unit_path: &[String], name: impl Into<String>) -> Self {
    NodeId::Input {
      unit_path: unit_path.to_vec(),
      name: name.into(),
    }
  }

  pub fn output(unit_path: &[String], name: impl Into<String>) -> Self {
    NodeId::Output {
      unit_path: unit_path.to_vec(),
      name: name.into(),
    }
  }

  pub fn as_address(&self) -> Option<&Address> {
    match self {
      NodeId::Instance(address) => Some(address),
      _ => None,
    }
  }

  /// Path of the unit this node belongs to.
  pub fn unit_path(&self) -> &[String] {
    match self {
      NodeId::Instance(address) => &address.unit_path,
      NodeId::Input { unit_path, .. } | NodeId::Output { unit_path, .. } => unit_path,
    }
  }
}

impl From<Address> for NodeId {
  fn from(address: Address) -> Self {
    NodeId::Instance(address)
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeId::Instance(address) => write!(f, "{address}"),
      NodeId::Input { unit_path, name } => write!(f, "{}var.{name}", prefix(unit_path)),
      NodeId::Output { unit_path, name } => write!(f, "{}output.{name}", prefix(unit_path)),
    }
  }
}

fn prefix(unit_path: &[String]) -> String {
  unit_path.iter().map(|s| format!("{s}.")).collect()
}
