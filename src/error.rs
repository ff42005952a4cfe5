//! Error types for the background removal service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Why a request could not get a worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// The wait queue already holds the configured maximum of callers
    QueueFull,
    /// The caller waited longer than the configured queue timeout
    WaitTimeout,
    /// The pool is shutting down and accepts no new work
    Closed,
}

impl std::fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "worker queue is full"),
            Self::WaitTimeout => write!(f, "timed out waiting for a worker slot"),
            Self::Closed => write!(f, "worker pool is closed"),
        }
    }
}

/// Error types for background removal requests
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Bad, corrupt or unsupported input image, or a malformed upload
    #[error("Invalid input: {0}")]
    Input(String),

    /// Input is a recognized image container the service cannot decode
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Worker pool saturated or closed
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(Exhaustion),

    /// Processing failure inside the removal engine
    #[error("Engine error: {0}")]
    Engine(String),

    /// The removal engine did not finish within the configured timeout
    #[error("Engine timed out after {0:?}")]
    EngineTimeout(std::time::Duration),

    /// Temp file or metadata persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Metadata record lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Create a new input error
    pub fn input<S: Into<String>>(msg: S) -> Self {
        Self::Input(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new engine error
    pub fn engine<S: Into<String>>(msg: S) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create a storage error for a failed scratch file operation
    pub fn scratch_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Storage(format!(
            "Failed to {} '{}': {}",
            operation,
            path.as_ref().display(),
            error
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether the caller supplied something the service cannot work with
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Input(_) | Self::UnsupportedFormat(_) | Self::NotFound(_)
        )
    }

    /// Whether retrying later may succeed without changing the request
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_) | Self::EngineTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = ServiceError::invalid_config("test config error");
        assert!(matches!(err, ServiceError::InvalidConfig(_)));

        let err = ServiceError::unsupported_format("image/avif");
        assert!(matches!(err, ServiceError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ServiceError::ResourceExhausted(Exhaustion::QueueFull);
        assert_eq!(err.to_string(), "Resource exhausted: worker queue is full");

        let err = ServiceError::input("missing multipart field 'file'");
        assert_eq!(err.to_string(), "Invalid input: missing multipart field 'file'");
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = ServiceError::file_io_error("create temp directory", Path::new("/tmp/jobs"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("create temp directory"));
        assert!(error_string.contains("/tmp/jobs"));

        let err = ServiceError::scratch_io_error("write scratch file", Path::new("/tmp/job.png"), &io_error);
        assert!(matches!(err, ServiceError::Storage(_)));
        assert!(err.to_string().contains("/tmp/job.png"));
        assert!(!err.is_client_error());

        let err = ServiceError::config_value_error("OUTPUT_QUALITY", 150, "0-100", Some(95));
        let error_string = err.to_string();
        assert!(error_string.contains("OUTPUT_QUALITY"));
        assert!(error_string.contains("150"));
        assert!(error_string.contains("Recommended: 95"));
    }

    #[test]
    fn test_classification() {
        assert!(ServiceError::input("bad").is_client_error());
        assert!(!ServiceError::engine("boom").is_client_error());
        assert!(ServiceError::ResourceExhausted(Exhaustion::WaitTimeout).is_retryable());
        assert!(!ServiceError::storage("disk full").is_retryable());
    }
}
