use async_trait::async_trait;
use trellis_config::UnitDef;

use crate::error::RegistryError;

/// Registry of reusable configuration units, keyed by source name.
#[async_trait]
pub trait UnitRegistry: Send + Sync {
  /// Get the unit stored under `source`, if any.
  async fn get(&self, source: &str) -> Result<Option<UnitDef>, RegistryError>;

  /// Store a unit under `source`.
  async fn install(&self, source: &str, unit: &UnitDef) -> Result<(), RegistryError>;

  /// List the source names of all stored units.
  async fn list(&self) -> Result<Vec<String>, RegistryError>;
}
