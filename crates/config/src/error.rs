/// Errors from building or validating a deployment spec.
///
/// Every variant names the offending field so a batch caller can print an
/// actionable message without extra context. Validation failures are never
/// retried; they are always detected before any external command runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A field has an invalid value (bad grammar, out-of-range port, ...).
    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
    /// Two or more fields form an inconsistent combination.
    #[error("{field}: {message}")]
    Conflict { field: String, message: String },
    /// The source directory has no usable build input.
    #[error("source_dir: {dir} does not contain docker-compose.yml/compose.yml or a Dockerfile")]
    NoSource { dir: String },
    /// Proxy mode was requested but no upstream or route could be inferred.
    /// Surfaced at construction time, never deferred to apply time.
    #[error("{field}: {message}")]
    Unresolvable { field: String, message: String },
    /// Mesh access mode needs a connected mesh client to pick a bind address.
    #[error("access_mode=mesh: {message}")]
    MeshUnavailable { message: String },
    /// Multiple errors collected during validation.
    #[error("{}", display_multiple(.0))]
    Multiple(Vec<ConfigError>),
}

fn display_multiple(errors: &[ConfigError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

pub type Result<T> = std::result::Result<T, ConfigError>;
