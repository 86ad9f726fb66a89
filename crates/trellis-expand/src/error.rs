use thiserror::Error;
use trellis_config::InputType;
use trellis_expr::EvalError;

/// Errors raised while expanding templates and composing units.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpandError {
  /// A count or for_each expression evaluated to a value of the wrong shape.
  #[error("invalid iteration value for '{template}': {message}")]
  InvalidIterationValue { template: String, message: String },

  /// A count or for_each expression depends on values only known after apply.
  #[error(
    "cannot expand '{template}': its {construct} depends on values known only after apply"
  )]
  UnresolvableIteration {
    template: String,
    construct: &'static str,
  },

  /// A required input was not bound.
  #[error("unit '{unit}' requires input '{name}'")]
  MissingRequiredInput { unit: String, name: String },

  /// An input value does not match its declared type.
  #[error("input '{name}' of unit '{unit}' must be {expected}, got {actual}")]
  InputType {
    unit: String,
    name: String,
    expected: InputType,
    actual: &'static str,
  },

  /// A caller bound an input the unit does not declare.
  #[error("unit '{unit}' has no input named '{name}'")]
  UnknownInput { unit: String, name: String },

  /// Evaluating an expression failed.
  #[error("in {location}: {error}")]
  Eval {
    location: String,
    #[source]
    error: EvalError,
  },

  /// A node refers to a unit path that was never composed.
  #[error("unit path not expanded: {0}")]
  UnknownUnit(String),
}

/// Label for a unit path in messages.
pub(crate) fn unit_label(path: &[String]) -> String {
  if path.is_empty() {
    "root".to_string()
  } else {
    path.join(".")
  }
}
