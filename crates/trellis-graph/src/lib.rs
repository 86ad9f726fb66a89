//! Trellis Graph
//!
//! This crate provides the "locked" configuration model and the dependency
//! graph built over its instances.
//!
//! - [`Configuration`] / [`ConfigurationUnit`] / [`ResourceTemplate`] are the
//!   validated form of the definitions in `trellis-config`, with every
//!   expression parsed and every unit source resolved.
//! - [`Expansion`] holds the concrete [`ResourceInstance`]s of a
//!   configuration, keyed by [`Address`].
//! - [`build`] turns an expansion into a [`DependencyGraph`] over instances
//!   and unit boundary nodes, rejecting cycles.

mod address;
mod deps;
mod error;
mod graph;
mod instance;
mod template;
mod unit;

pub use address::{Address, InstanceKey, NodeId};
pub use deps::expression_dependencies;
pub use error::GraphError;
pub use graph::{DependencyGraph, build};
pub use instance::{Bindings, ExpandedUnit, Expansion, ResourceInstance, instance_object};
pub use template::{IterationSpec, ResourceTemplate};
pub use unit::{Configuration, ConfigurationUnit, UnitCall, UnitInput, UnitItem};
