//! Error type system for the catalog core
//!
//! This module provides the crate-wide error taxonomy:
//! - Trust failures (validation, permissions) that block execution
//! - Recoverable failures (network, install, timeout) reported per operation
//! - Context chaining for foreign errors

/// Main error type for catalog management
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    // Trust layer
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Incompatible version: {0}")]
    IncompatibleVersion(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Lifecycle
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Install error: {0}")]
    InstallError(String),

    #[error("Catalog not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // System
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CatalogError {
    /// Get the error type name for reporting
    ///
    /// An unparseable version is a malformed plugin, so it reports as a validation failure.
    pub fn error_type(&self) -> &'static str {
        match self {
            CatalogError::ValidationError(_) | CatalogError::IncompatibleVersion(_) => {
                "ValidationError"
            }
            CatalogError::PermissionDenied(_) => "PermissionDenied",
            CatalogError::NetworkError(_) => "NetworkError",
            CatalogError::InstallError(_) => "InstallError",
            CatalogError::NotFound(_) => "NotFound",
            CatalogError::Timeout(_) => "Timeout",
            CatalogError::Cancelled(_) => "Cancelled",
            CatalogError::ConfigError(_) => "ConfigError",
            CatalogError::IoError(_) => "IoError",
            CatalogError::SerializationError(_) => "SerializationError",
        }
    }

    /// Check if this error is retryable by re-issuing the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::NetworkError(_)
                | CatalogError::Timeout(_)
                | CatalogError::InstallError(_)
        )
    }

    /// Whether this error means the plugin itself is malformed
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CatalogError::ValidationError(_) | CatalogError::IncompatibleVersion(_)
        )
    }
}

/// `std::io::Error` is not `Clone`; the copy keeps its kind and message
impl Clone for CatalogError {
    fn clone(&self) -> Self {
        match self {
            CatalogError::ValidationError(m) => CatalogError::ValidationError(m.clone()),
            CatalogError::IncompatibleVersion(m) => CatalogError::IncompatibleVersion(m.clone()),
            CatalogError::PermissionDenied(m) => CatalogError::PermissionDenied(m.clone()),
            CatalogError::NetworkError(m) => CatalogError::NetworkError(m.clone()),
            CatalogError::InstallError(m) => CatalogError::InstallError(m.clone()),
            CatalogError::NotFound(m) => CatalogError::NotFound(m.clone()),
            CatalogError::Timeout(m) => CatalogError::Timeout(m.clone()),
            CatalogError::Cancelled(m) => CatalogError::Cancelled(m.clone()),
            CatalogError::ConfigError(m) => CatalogError::ConfigError(m.clone()),
            CatalogError::IoError(e) => CatalogError::IoError(std::io::Error::new(e.kind(), e.to_string())),
            CatalogError::SerializationError(m) => CatalogError::SerializationError(m.clone()),
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CatalogError::Timeout(err.to_string())
        } else {
            CatalogError::NetworkError(err.to_string())
        }
    }
}

/// Result type alias for operations that can fail with CatalogError
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CatalogError::InstallError(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| CatalogError::InstallError(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        assert_eq!(
            CatalogError::NotFound("acme".into()).error_type(),
            "NotFound"
        );
        assert_eq!(
            CatalogError::PermissionDenied("acme".into()).error_type(),
            "PermissionDenied"
        );
        assert_eq!(
            CatalogError::IncompatibleVersion("1.x".into()).error_type(),
            "ValidationError"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(CatalogError::NetworkError("test".into()).is_retryable());
        assert!(CatalogError::Timeout("test".into()).is_retryable());
        assert!(!CatalogError::ValidationError("test".into()).is_retryable());
        assert!(!CatalogError::PermissionDenied("test".into()).is_retryable());
        assert!(!CatalogError::IncompatibleVersion("test".into()).is_retryable());
    }

    #[test]
    fn test_incompatible_version_is_validation() {
        assert!(CatalogError::IncompatibleVersion("abc".into()).is_validation());
        assert!(!CatalogError::NetworkError("abc".into()).is_validation());
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let contexted = result.context("Failed to read manifest");

        let err = contexted.unwrap_err();
        assert!(err.to_string().contains("Failed to read manifest"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: CatalogError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.error_type(), "SerializationError");
    }

    #[test]
    fn test_clone_keeps_io_kind() {
        let err = CatalogError::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"));
        match err.clone() {
            CatalogError::IoError(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied);
                assert!(e.to_string().contains("locked"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
