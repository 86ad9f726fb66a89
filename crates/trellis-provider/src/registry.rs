use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::null::NullProvider;
use crate::provider::Provider;

/// Maps resource kinds to providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
  providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the built-in `null` provider.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register("null", Arc::new(NullProvider::new()));
    registry
  }

  /// Register a provider for a kind, replacing any previous one.
  pub fn register(&mut self, kind: impl Into<String>, provider: Arc<dyn Provider>) {
    self.providers.insert(kind.into(), provider);
  }

  /// Builder-style variant of [`ProviderRegistry::register`].
  pub fn with(mut self, kind: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
    self.register(kind, provider);
    self
  }

  pub fn get(&self, kind: &str) -> Result<Arc<dyn Provider>, ProviderError> {
    self
      .providers
      .get(kind)
      .cloned()
      .ok_or_else(|| ProviderError::NotFound {
        kind: kind.to_string(),
      })
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.providers.contains_key(kind)
  }

  /// Registered kinds, sorted.
  pub fn kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.providers.keys().map(String::as_str).collect();
    kinds.sort();
    kinds
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builtins() {
    let registry = ProviderRegistry::with_builtins();
    assert!(registry.get("null").is_ok());
    assert_eq!(registry.kinds(), vec!["null"]);
    assert!(matches!(
      registry.get("aws_instance"),
      Err(ProviderError::NotFound { kind }) if kind == "aws_instance"
    ));
  }
}
