//! Expression values for resource configuration.
//!
//! Every attribute, local, output and unit input is a JSON value. Strings may
//! contain `${ … }` interpolations that are parsed by the resolver and
//! evaluated by the engine. Arrays and objects are evaluated element-wise.
//!
//! # Examples
//!
//! ```json
//! {
//!   "name": "web-${count.index}",
//!   "subnet_id": "${unit.network.subnet_ids[count.index]}",
//!   "tags": { "env": "${var.env}", "team": "platform" },
//!   "port": 8080
//! }
//! ```
//!
//! A string that is exactly one interpolation keeps the type of its value:
//! `"${var.replicas}"` evaluates to a number, `"r-${var.replicas}"` to a string.

/// A configuration value that may contain interpolations.
pub type ExprValue = serde_json::Value;
