use std::collections::BTreeMap;

use trellis_expr::Expr;

/// How a template expands into instances.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum IterationSpec {
  /// Exactly one instance, keyed by nothing.
  #[default]
  None,
  /// `n` instances keyed `0..n`.
  Count(Expr),
  /// One instance per key of a map or set.
  ForEach(Expr),
}

impl IterationSpec {
  pub fn expr(&self) -> Option<&Expr> {
    match self {
      IterationSpec::None => None,
      IterationSpec::Count(expr) | IterationSpec::ForEach(expr) => Some(expr),
    }
  }
}

/// A resolved resource template. Immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTemplate {
  pub name: String,
  pub kind: String,
  pub attributes: BTreeMap<String, Expr>,
  pub iteration: IterationSpec,
  /// Sibling templates this template must follow.
  pub depends_on: Vec<String>,
  pub timeout_ms: Option<u64>,
}
