use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trellis_graph::Address;

/// State of every applied instance, keyed by address.
pub type StateMap = BTreeMap<Address, StateRecord>;

/// What the engine remembers about an applied instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
  pub kind: String,
  /// Provider-assigned id.
  pub id: String,
  /// Attributes the instance was last applied with.
  pub attrs: serde_json::Map<String, serde_json::Value>,
  /// Attributes the provider returned.
  pub computed_attrs: serde_json::Map<String, serde_json::Value>,
  /// Instances this one depended on when last applied. Used to order
  /// destroys once the instance is no longer configured.
  #[serde(default)]
  pub dependencies: Vec<Address>,
  pub updated_at: DateTime<Utc>,
}

/// Holder of the advisory run lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLock {
  pub run_id: String,
  pub acquired_at: DateTime<Utc>,
}

impl RunLock {
  pub fn new(run_id: &str) -> Self {
    Self {
      run_id: run_id.to_string(),
      acquired_at: Utc::now(),
    }
  }
}
