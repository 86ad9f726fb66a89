use thiserror::Error;

/// Errors that can occur when working with the unit registry.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// IO error when reading/writing unit files.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Failed to parse a unit definition.
  #[error("invalid unit definition '{source_name}': {message}")]
  InvalidUnit {
    source_name: String,
    message: String,
  },

  /// A source name that cannot be mapped to a file name and back.
  #[error("invalid unit source name: {0}")]
  InvalidSource(String),

  /// A unit is already stored under this name.
  #[error("unit already exists: {0}")]
  AlreadyExists(String),
}
