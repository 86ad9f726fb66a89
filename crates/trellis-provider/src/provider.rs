use async_trait::async_trait;

use crate::error::ProviderError;

/// Attribute object exchanged with providers.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
  pub id: String,
  pub computed_attrs: Attributes,
}

/// CRUD operations for one or more resource kinds.
///
/// Implementations must tolerate concurrent calls; the engine invokes them
/// from several workers at once.
#[async_trait]
pub trait Provider: Send + Sync {
  /// Create a resource and return its id and computed attributes.
  async fn create(&self, kind: &str, attrs: &Attributes) -> Result<Created, ProviderError>;

  /// Read a resource's computed attributes; `None` if it no longer exists.
  async fn read(&self, kind: &str, id: &str) -> Result<Option<Attributes>, ProviderError>;

  /// Update a resource in place and return its new computed attributes.
  async fn update(
    &self,
    kind: &str,
    id: &str,
    old: &Attributes,
    new: &Attributes,
  ) -> Result<Attributes, ProviderError>;

  /// Delete a resource.
  async fn delete(&self, kind: &str, id: &str) -> Result<(), ProviderError>;
}
