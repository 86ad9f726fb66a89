//! Trellis Config
//!
//! This crate contains the serializable configuration types for trellis.
//! These types represent resource and unit definitions before they are
//! resolved by the resolver into locked, validated structures.
//!
//! Configuration can be loaded from:
//! - JSON files (via the CLI, `trellis plan config.json`)
//! - A unit registry directory (for reusable configuration units)
//!
//! Attribute, local and output values are kept as raw JSON ([`ExprValue`]);
//! the resolver parses their `${ … }` interpolations into expressions.

mod expr;
mod input;
mod resource;
mod unit;

pub use expr::ExprValue;
pub use input::{InputDef, InputType};
pub use resource::ResourceDef;
pub use unit::{UnitCallDef, UnitDef};
