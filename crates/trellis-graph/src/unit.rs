use std::collections::BTreeMap;
use std::sync::Arc;

use trellis_config::InputType;
use trellis_expr::Expr;

use crate::template::ResourceTemplate;

/// A declared input of a resolved unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitInput {
  pub name: String,
  pub input_type: InputType,
  pub default: Option<Expr>,
}

impl UnitInput {
  pub fn is_required(&self) -> bool {
    self.default.is_none()
  }
}

/// A resolved call to a nested unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCall {
  pub name: String,
  pub source: String,
  /// Input expressions, evaluated in the calling unit's scope.
  pub inputs: BTreeMap<String, Expr>,
  pub unit: Arc<ConfigurationUnit>,
}

/// An item of a unit that the expander visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitItem {
  Local(usize),
  Template(usize),
  Call(usize),
}

/// A resolved configuration unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigurationUnit {
  pub inputs: BTreeMap<String, UnitInput>,
  /// Locals in an order where every local follows the locals it reads.
  pub locals: Vec<(String, Expr)>,
  pub templates: Vec<ResourceTemplate>,
  pub calls: Vec<UnitCall>,
  pub outputs: BTreeMap<String, Expr>,
  /// Visit order for expansion: every item follows the items its
  /// expressions reference, except where templates reference each other
  /// cyclically, in which case declaration order is kept.
  pub order: Vec<UnitItem>,
}

impl ConfigurationUnit {
  pub fn template(&self, name: &str) -> Option<&ResourceTemplate> {
    self.templates.iter().find(|t| t.name == name)
  }

  pub fn call(&self, name: &str) -> Option<&UnitCall> {
    self.calls.iter().find(|c| c.name == name)
  }

  pub fn local(&self, name: &str) -> Option<&Expr> {
    self
      .locals
      .iter()
      .find(|(local, _)| local == name)
      .map(|(_, expr)| expr)
  }
}

/// A fully resolved configuration: the root unit and everything it calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
  pub root: Arc<ConfigurationUnit>,
}

impl Configuration {
  pub fn new(root: ConfigurationUnit) -> Self {
    Self {
      root: Arc::new(root),
    }
  }
}
