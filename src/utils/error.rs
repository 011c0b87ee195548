//! Error Handling Module
//!
//! Defines the error type shared by the classifier, the upstream clients and
//! the HTTP layer. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for crop diagnosis operations
#[derive(Error, Debug)]
pub enum DiagnosisError {
    /// The uploaded bytes could not be decoded as an image
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// Error with model loading or the forward pass
    #[error("Model error: {0}")]
    Model(String),

    /// The class index file is malformed or does not match the model
    #[error("Class index error: {0}")]
    ClassIndex(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to an upstream provider
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl DiagnosisError {
    /// Whether the error was caused by the caller's input rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DiagnosisError::ImageDecode(_) | DiagnosisError::InvalidInput(_)
        )
    }
}

impl From<serde_json::Error> for DiagnosisError {
    fn from(err: serde_json::Error) -> Self {
        DiagnosisError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for DiagnosisError {
    fn from(err: image::ImageError) -> Self {
        DiagnosisError::ImageDecode(err.to_string())
    }
}

impl From<reqwest::Error> for DiagnosisError {
    fn from(err: reqwest::Error) -> Self {
        DiagnosisError::Upstream(err.to_string())
    }
}

/// Convenience Result type for crop diagnosis operations
pub type Result<T> = std::result::Result<T, DiagnosisError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| DiagnosisError::Config(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| DiagnosisError::Config(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| DiagnosisError::Config(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| DiagnosisError::Config(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiagnosisError::ClassIndex("duplicate index 3".to_string());
        assert_eq!(format!("{}", err), "Class index error: duplicate index 3");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(DiagnosisError::ImageDecode("bad header".into()).is_client_error());
        assert!(DiagnosisError::InvalidInput("empty".into()).is_client_error());
        assert!(!DiagnosisError::Model("shape".into()).is_client_error());
        assert!(!DiagnosisError::Upstream("refused".into()).is_client_error());
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.context("Failed to read class indices").unwrap_err();
        assert!(err.to_string().contains("Failed to read class indices"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let with_context = opt.with_context(|| "healthy label missing".to_string());
        assert!(matches!(with_context, Err(DiagnosisError::Config(_))));
    }
}
