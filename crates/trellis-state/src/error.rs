use thiserror::Error;

/// Error type for state operations.
#[derive(Debug, Error)]
pub enum StateError {
  /// Another run holds the lock.
  #[error("another run ({holder}) holds the state lock")]
  ConcurrentRun { holder: String },

  /// A stored record could not be decoded.
  #[error("invalid state record '{address}': {message}")]
  InvalidRecord { address: String, message: String },

  /// IO error when reading/writing state files.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// State file is not valid JSON.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}
