use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use trellis_config::UnitDef;

use crate::error::RegistryError;
use crate::registry::UnitRegistry;

/// Filesystem-based unit registry.
///
/// Units are stored as one JSON file per source name:
/// ```text
/// {root}/
/// ├── network.json
/// └── my-org--web-cluster.json   (source "my-org/web-cluster")
/// ```
pub struct FsUnitRegistry {
  root: PathBuf,
}

impl FsUnitRegistry {
  /// Create a new filesystem registry at the given root path.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Get the root directory of the registry.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Map a source name to its file name.
  /// Example: "my-org/web-cluster" -> "my-org--web-cluster.json"
  ///
  /// Segments must be non-empty, must not contain `--` and must not start
  /// or end with `-`, so [`Self::parse_file_name`] can invert the mapping.
  fn file_name(source: &str) -> Result<String, RegistryError> {
    let valid = source.split('/').all(|segment| {
      !segment.is_empty()
        && !segment.contains("--")
        && !segment.starts_with('-')
        && !segment.ends_with('-')
        && !segment.contains(['\\', '.'])
    });
    if !valid {
      return Err(RegistryError::InvalidSource(source.to_string()));
    }
    Ok(format!("{}.json", source.replace('/', "--")))
  }

  /// Map a file name back to its source name.
  fn parse_file_name(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.is_empty() {
      return None;
    }
    Some(stem.replace("--", "/"))
  }
}

#[async_trait]
impl UnitRegistry for FsUnitRegistry {
  async fn get(&self, source: &str) -> Result<Option<UnitDef>, RegistryError> {
    let path = self.root.join(Self::file_name(source)?);
    if !path.exists() {
      return Ok(None);
    }

    let content = fs::read_to_string(&path).await?;
    let unit = serde_json::from_str(&content).map_err(|e| RegistryError::InvalidUnit {
      source_name: source.to_string(),
      message: e.to_string(),
    })?;
    Ok(Some(unit))
  }

  async fn install(&self, source: &str, unit: &UnitDef) -> Result<(), RegistryError> {
    let path = self.root.join(Self::file_name(source)?);
    if path.exists() {
      return Err(RegistryError::AlreadyExists(source.to_string()));
    }

    fs::create_dir_all(&self.root).await?;
    let content = serde_json::to_string_pretty(unit).map_err(|e| RegistryError::InvalidUnit {
      source_name: source.to_string(),
      message: e.to_string(),
    })?;
    fs::write(&path, content).await?;
    Ok(())
  }

  async fn list(&self) -> Result<Vec<String>, RegistryError> {
    let mut names = Vec::new();

    if !self.root.exists() {
      return Ok(names);
    }

    let mut entries = fs::read_dir(&self.root).await?;
    while let Some(entry) = entries.next_entry().await? {
      if let Some(name) = entry
        .file_name()
        .to_str()
        .and_then(Self::parse_file_name)
      {
        names.push(name);
      }
    }

    names.sort();
    Ok(names)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_config::InputDef;

  #[test]
  fn test_parse_file_name_with_org() {
    assert_eq!(
      FsUnitRegistry::parse_file_name("my-org--web-cluster.json"),
      Some("my-org/web-cluster".to_string())
    );
    assert_eq!(
      FsUnitRegistry::file_name("my-org/web-cluster").unwrap(),
      "my-org--web-cluster.json"
    );
  }

  #[test]
  fn test_file_name_is_inverted_by_parse() {
    for source in ["network", "my-org/web-cluster", "a/b/c"] {
      let file_name = FsUnitRegistry::file_name(source).unwrap();
      assert_eq!(
        FsUnitRegistry::parse_file_name(&file_name).as_deref(),
        Some(source)
      );
    }
  }

  #[test]
  fn test_file_name_rejects_ambiguous_sources() {
    for source in ["", "a--b", "a-/b", "a/-b", "a//b", "../x", "a\\b"] {
      assert!(
        matches!(
          FsUnitRegistry::file_name(source),
          Err(RegistryError::InvalidSource(_))
        ),
        "expected {source:?} to be rejected"
      );
    }
  }

  #[test]
  fn test_parse_file_name_invalid() {
    assert_eq!(FsUnitRegistry::parse_file_name("README.md"), None);
    assert_eq!(FsUnitRegistry::parse_file_name(".json"), None);
  }

  #[tokio::test]
  async fn test_install_get_list() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsUnitRegistry::new(dir.path().join("units"));

    assert!(registry.get("network").await.unwrap().is_none());
    assert!(registry.list().await.unwrap().is_empty());

    let mut unit = UnitDef::default();
    unit.inputs.insert("cidr".to_string(), InputDef::default());
    registry.install("network", &unit).await.unwrap();
    registry.install("my-org/db", &UnitDef::default()).await.unwrap();
    registry.install("a/b/c", &UnitDef::default()).await.unwrap();

    let loaded = registry.get("network").await.unwrap().unwrap();
    assert_eq!(loaded, unit);
    assert_eq!(
      registry.list().await.unwrap(),
      vec!["a/b/c".to_string(), "my-org/db".to_string(), "network".to_string()]
    );
    assert!(matches!(
      registry.install("network", &unit).await,
      Err(RegistryError::AlreadyExists(_))
    ));
  }

  #[tokio::test]
  async fn test_invalid_unit_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    let registry = FsUnitRegistry::new(dir.path());
    assert!(matches!(
      registry.get("broken").await,
      Err(RegistryError::InvalidUnit { .. })
    ));
  }
}
