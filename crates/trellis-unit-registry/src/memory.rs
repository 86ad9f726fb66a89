use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use trellis_config::UnitDef;

use crate::error::RegistryError;
use crate::registry::UnitRegistry;

/// In-memory unit registry, for embedding and tests.
#[derive(Default)]
pub struct MemoryUnitRegistry {
  units: RwLock<HashMap<String, UnitDef>>,
}

impl MemoryUnitRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with_unit(self, source: &str, unit: UnitDef) -> Self {
    self
      .units
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(source.to_string(), unit);
    self
  }
}

#[async_trait]
impl UnitRegistry for MemoryUnitRegistry {
  async fn get(&self, source: &str) -> Result<Option<UnitDef>, RegistryError> {
    let units = self.units.read().unwrap_or_else(|e| e.into_inner());
    Ok(units.get(source).cloned())
  }

  async fn install(&self, source: &str, unit: &UnitDef) -> Result<(), RegistryError> {
    let mut units = self.units.write().unwrap_or_else(|e| e.into_inner());
    if units.contains_key(source) {
      return Err(RegistryError::AlreadyExists(source.to_string()));
    }
    units.insert(source.to_string(), unit.clone());
    Ok(())
  }

  async fn list(&self) -> Result<Vec<String>, RegistryError> {
    let units = self.units.read().unwrap_or_else(|e| e.into_inner());
    let mut names: Vec<String> = units.keys().cloned().collect();
    names.sort();
    Ok(names)
  }
}
