//! Trellis Expressions
//!
//! This crate provides the value model and the expression language used inside
//! resource attribute definitions.
//!
//! - [`Value`] is the tagged union every expression evaluates to, including the
//!   [`Value::Unknown`] placeholder for values that depend on resources which
//!   have not been applied yet.
//! - [`parse_template`] / [`parse_json`] turn definition data into an [`Expr`].
//! - [`Evaluator`] evaluates an [`Expr`] against a chained [`Scope`].
//! - [`references`] statically walks an [`Expr`] and reports every symbol it
//!   touches, which the graph builder turns into dependency edges.

mod ast;
mod error;
mod eval;
mod functions;
mod parser;
mod refs;
mod scope;
mod value;

pub use ast::{BinaryOp, Expr, TemplatePart, UnaryOp};
pub use error::{EvalError, ParseError};
pub use eval::{Evaluator, evaluate};
pub use functions::{Arity, Builtin, Functions};
pub use parser::{is_identifier, parse_expression, parse_json, parse_template};
pub use refs::{Reference, Step, references};
pub use scope::Scope;
pub use value::Value;
