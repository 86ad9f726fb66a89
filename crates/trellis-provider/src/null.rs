use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Operation, ProviderError};
use crate::provider::{Attributes, Created, Provider};

/// Provider that manages nothing: every resource gets a fresh uuid id and
/// its attributes echoed back as computed attributes.
///
/// Resources live only in this process, so `read` reports ids created by
/// another process as gone.
#[derive(Default)]
pub struct NullProvider {
  resources: RwLock<HashMap<String, Attributes>>,
}

impl NullProvider {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Provider for NullProvider {
  async fn create(&self, kind: &str, attrs: &Attributes) -> Result<Created, ProviderError> {
    let id = uuid::Uuid::new_v4().to_string();
    debug!(kind = %kind, id = %id, "null resource created");

    self
      .resources
      .write()
      .map_err(|_| ProviderError::failed(Operation::Create, "resource table poisoned"))?
      .insert(id.clone(), attrs.clone());

    Ok(Created {
      id,
      computed_attrs: attrs.clone(),
    })
  }

  async fn read(&self, _kind: &str, id: &str) -> Result<Option<Attributes>, ProviderError> {
    let resources = self
      .resources
      .read()
      .map_err(|_| ProviderError::failed(Operation::Read, "resource table poisoned"))?;
    Ok(resources.get(id).cloned())
  }

  async fn update(
    &self,
    kind: &str,
    id: &str,
    _old: &Attributes,
    new: &Attributes,
  ) -> Result<Attributes, ProviderError> {
    debug!(kind = %kind, id = %id, "null resource updated");
    self
      .resources
      .write()
      .map_err(|_| ProviderError::failed(Operation::Update, "resource table poisoned"))?
      .insert(id.to_string(), new.clone());
    Ok(new.clone())
  }

  async fn delete(&self, kind: &str, id: &str) -> Result<(), ProviderError> {
    debug!(kind = %kind, id = %id, "null resource deleted");
    self
      .resources
      .write()
      .map_err(|_| ProviderError::failed(Operation::Delete, "resource table poisoned"))?
      .remove(id);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn attrs(value: serde_json::Value) -> Attributes {
    value.as_object().cloned().unwrap()
  }

  #[tokio::test]
  async fn test_null_lifecycle() {
    let provider = NullProvider::new();
    let created = provider
      .create("null", &attrs(json!({ "name": "a" })))
      .await
      .unwrap();

    assert!(uuid::Uuid::parse_str(&created.id).is_ok());
    assert_eq!(created.computed_attrs["name"], json!("a"));
    assert!(provider.read("null", &created.id).await.unwrap().is_some());

    let old = created.computed_attrs.clone();
    let updated = provider
      .update("null", &created.id, &old, &attrs(json!({ "name": "b" })))
      .await
      .unwrap();
    assert_eq!(updated["name"], json!("b"));

    provider.delete("null", &created.id).await.unwrap();
    assert!(provider.read("null", &created.id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_null_ids_are_unique() {
    let provider = NullProvider::new();
    let a = provider.create("null", &Attributes::new()).await.unwrap();
    let b = provider.create("null", &Attributes::new()).await.unwrap();
    assert_ne!(a.id, b.id);
  }
}
