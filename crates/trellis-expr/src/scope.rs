use std::collections::HashMap;

use crate::value::Value;

/// A chained symbol table.
///
/// Lookups walk from the innermost scope outward, so a per-instance scope
/// binding `count` or `each` shadows nothing but can still see the unit's
/// `var`, `local` and resource symbols of its parents.
#[derive(Debug, Default)]
pub struct Scope<'p> {
  parent: Option<&'p Scope<'p>>,
  symbols: HashMap<String, Value>,
}

impl Scope<'static> {
  /// Create an empty root scope.
  pub fn new() -> Self {
    Self::default()
  }
}

impl<'p> Scope<'p> {
  /// Create an empty scope whose lookups fall back to `self`.
  pub fn child(&'p self) -> Scope<'p> {
    Scope {
      parent: Some(self),
      symbols: HashMap::new(),
    }
  }

  /// Bind a root symbol in this scope, replacing any previous binding.
  pub fn bind(&mut self, name: impl Into<String>, value: Value) {
    self.symbols.insert(name.into(), value);
  }

  /// Builder-style variant of [`Scope::bind`].
  pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
    self.bind(name, value);
    self
  }

  /// Look up a root symbol, innermost scope first.
  pub fn lookup(&self, name: &str) -> Option<&Value> {
    match self.symbols.get(name) {
      Some(value) => Some(value),
      None => self.parent.and_then(|p| p.lookup(name)),
    }
  }

  /// Symbols bound directly in this scope.
  pub fn symbols(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.symbols.iter()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_child_shadows_parent() {
    let root = Scope::new()
      .with("var", Value::from("root"))
      .with("local", Value::from("root-local"));
    let child = root.child().with("var", Value::from("child"));

    assert_eq!(child.lookup("var"), Some(&Value::from("child")));
    assert_eq!(child.lookup("local"), Some(&Value::from("root-local")));
    assert_eq!(root.lookup("var"), Some(&Value::from("root")));
    assert!(child.lookup("missing").is_none());
  }
}
