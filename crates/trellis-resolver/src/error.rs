use thiserror::Error;
use trellis_expr::ParseError;
use trellis_unit_registry::RegistryError;

/// Errors that can occur while resolving a configuration.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// An expression could not be parsed.
  #[error("in {location}: {error}")]
  Parse {
    location: String,
    #[source]
    error: ParseError,
  },

  /// Two templates in one unit share a name.
  #[error("duplicate resource name: {name}")]
  DuplicateTemplate { name: String },

  /// Two unit calls in one unit share a name.
  #[error("duplicate unit call name: {name}")]
  DuplicateCall { name: String },

  /// A template uses a name reserved for expression symbols.
  #[error("resource name '{name}' is reserved")]
  ReservedName { name: String },

  /// A name that cannot be written as an identifier in expressions.
  #[error("{what} name '{name}' must start with a letter or '_' and contain only letters, digits, '_' or '-'")]
  InvalidName { what: &'static str, name: String },

  /// A template sets both `count` and `for_each`.
  #[error("resource '{template}' sets both count and for_each")]
  ConflictingIteration { template: String },

  /// `depends_on` names a template that does not exist.
  #[error("resource '{template}' depends on unknown resource '{target}'")]
  UnknownDependsOn { template: String, target: String },

  /// An expression references a symbol that does not exist.
  #[error("in {location}: invalid reference '{reference}': {message}")]
  UnknownReference {
    location: String,
    reference: String,
    message: String,
  },

  /// Locals reference each other in a cycle.
  #[error("cycle between locals: {}", path.join(" -> "))]
  LocalCycle { path: Vec<String> },

  /// A unit call names a source missing from the registry.
  #[error("unit not found: {source_name}")]
  UnitNotFound { source_name: String },

  /// A unit calls itself, directly or through other units.
  #[error("recursive unit call: {}", chain.join(" -> "))]
  RecursiveUnit { chain: Vec<String> },

  /// Registry error while looking up a unit.
  #[error("registry error: {0}")]
  Registry(#[from] RegistryError),
}
