//! Trellis Expand
//!
//! Turns a locked [`Configuration`](trellis_graph::Configuration) into its
//! concrete instance set.
//!
//! - [`expand`] is the iteration expander: one template plus a scope in,
//!   zero or more keyed instances out.
//! - [`compose`] / [`compose_unit`] are the unit composer: they validate unit
//!   inputs, expand every template of every nested unit under its unit path
//!   and evaluate unit outputs.
//! - [`unit_scope`], [`evaluate_attributes`] and [`evaluate_node`] rebuild
//!   evaluation scopes from the current [`Values`], which is how the planner
//!   and the scheduler re-evaluate attributes once upstream values are known.

mod composer;
mod context;
mod error;
mod expander;
mod values;

pub use composer::{Composition, compose, compose_unit};
pub use context::{check_input_type, evaluate_attributes, evaluate_node, unit_scope};
pub use error::ExpandError;
pub use expander::expand;
pub use values::Values;
