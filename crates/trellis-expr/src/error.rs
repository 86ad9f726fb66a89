use thiserror::Error;

/// Errors raised while parsing expression source.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at offset {offset} in {source_text:?}: {message}")]
pub struct ParseError {
  pub source_text: String,
  pub offset: usize,
  pub message: String,
}

/// Errors raised while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
  /// A symbol, attribute, index or key that does not exist.
  #[error("reference error at '{path}': {message}")]
  Reference { path: String, message: String },

  /// No builtin with this name accepts this many arguments.
  #[error("function not found: {name} with {arity} argument(s)")]
  FunctionNotFound { name: String, arity: usize },

  /// An operation was applied to a value of the wrong type.
  #[error("type error in '{expr}': {message}")]
  Type { expr: String, message: String },

  /// A builtin rejected its arguments.
  #[error("call to {name}() failed: {message}")]
  Function { name: String, message: String },
}

impl EvalError {
  pub(crate) fn function(name: &str, message: impl Into<String>) -> Self {
    EvalError::Function {
      name: name.to_string(),
      message: message.into(),
    }
  }
}
