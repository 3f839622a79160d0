//! Error types for esmpack.

use thiserror::Error;

/// Result type for esmpack operations.
pub type Result<T> = std::result::Result<T, EsmpackError>;

/// Main error type for esmpack.
#[derive(Error, Debug)]
pub enum EsmpackError {
    /// Request path or package name could not be parsed
    #[error("invalid package descriptor: {0}")]
    InvalidDescriptor(String),

    /// Package, version, tag, branch or registry entry absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Registry or git transport failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Registry answered with an unexpected status or payload
    #[error("registry error: {0}")]
    Registry(String),

    /// Dependency closure installation failed
    #[error("install failed: {0}")]
    Install(String),

    /// Entry-point resolution contradicted itself
    #[error("entry resolution failed: {0}")]
    Resolve(String),

    /// The bundler reported errors; carries the first error text
    #[error("bundle failed: {0}")]
    Bundle(String),

    /// An external reference could not be resolved to a canonical URL.
    /// Non-fatal: the caller substitutes a diagnostic module URL.
    #[error("external rewrite failed: {0}")]
    Rewrite(String),

    /// Blob or key-value store I/O failure
    #[error("store error: {0}")]
    Store(String),

    /// Declaration copier failed
    #[error("declaration copy failed for {entry}: {source}")]
    Declaration {
        entry: String,
        #[source]
        source: Box<EsmpackError>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Semver parsing error
    #[error("invalid version: {0}")]
    Semver(#[from] semver::Error),

    /// General error with message
    #[error("{0}")]
    Other(String),
}

impl EsmpackError {
    /// Whether this error means "the thing does not exist" as opposed to a
    /// transport or protocol failure. Callers probing for optional packages
    /// (e.g. `@types/<name>` siblings) continue on `NotFound` and abort on
    /// everything else.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EsmpackError::NotFound(_))
    }
}

impl From<anyhow::Error> for EsmpackError {
    fn from(err: anyhow::Error) -> Self {
        EsmpackError::Other(err.to_string())
    }
}

impl From<&str> for EsmpackError {
    fn from(s: &str) -> Self {
        EsmpackError::Other(s.to_string())
    }
}

impl From<String> for EsmpackError {
    fn from(s: String) -> Self {
        EsmpackError::Other(s)
    }
}
