//! Error handling for the frame pipeline
//!
//! This module defines the crate-wide error type and a Result alias.
//! None of the expected runtime states of the pipeline (empty channel,
//! full channel, no frame ready) are errors; these variants cover the
//! failures that are reported and then tolerated by the workers.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A frame source failed to open, read, close or dispose
    #[error("Source error: {0}")]
    Source(String),

    /// A transform rejected its input
    #[error("Transform error: {0}")]
    Transform(String),

    /// No factory is registered for the requested source kind
    #[error("Unknown source kind: {0}")]
    UnknownSource(String),

    /// No factory is registered for the requested transform kind
    #[error("Unknown transform kind: {0}")]
    UnknownTransform(String),

    /// A command was invoked that the transform does not implement
    #[error("Transform '{transform}' has no command '{command}'")]
    UnknownCommand { transform: String, command: String },

    /// A parameter was missing or had the wrong type
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    /// Frame dimensions do not agree
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to the shared memory region
    #[error("Shared region error: {0}")]
    SharedRegion(String),

    /// Errors related to the isolated worker process
    #[error("Worker process error: {0}")]
    Worker(String),

    /// An operation is not valid in the worker's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The other end of a channel has gone away
    #[error("Channel disconnected: {0}")]
    Disconnected(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire encoding errors
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Wire decoding errors
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Image decoding errors from the file source
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build an `InvalidParameter` error
    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<PipelineError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Transform("negative exposure".to_string());
        assert_eq!(err.to_string(), "Transform error: negative exposure");
    }

    #[test]
    fn test_error_with_context() {
        let err = PipelineError::Source("camera unplugged".to_string());
        let with_ctx = err.with_context("Failed to open source");
        assert!(with_ctx.to_string().contains("Failed to open source"));
        assert!(with_ctx.to_string().contains("camera unplugged"));
    }

    #[test]
    fn test_unknown_command_error() {
        let err = PipelineError::UnknownCommand {
            transform: "scale".to_string(),
            command: "set_exposure".to_string(),
        };
        assert!(err.to_string().contains("scale"));
        assert!(err.to_string().contains("set_exposure"));
    }

    #[test]
    fn test_result_ext_on_io_error() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res.context("Reading config").unwrap_err();
        assert!(matches!(err, PipelineError::WithContext { .. }));
        assert!(err.to_string().starts_with("Reading config"));
    }
}
