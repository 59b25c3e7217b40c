//! Error handling for cvinfer-rs
//!
//! The pipeline modules carry their own narrow error enums
//! (`crate::pipeline::error`). This module wraps them into one crate-level
//! type for callers that drive a whole engine: load config, bind, start, stop.

use crate::pipeline::error::{BindError, PoolError, StartError, StopError};
use thiserror::Error;

/// Main error type for cvinfer-rs operations
#[derive(Error, Debug)]
pub enum CvInferError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors while wiring nodes into a graph
    #[error("Bind error: {0}")]
    Bind(#[from] BindError),

    /// Errors while starting a node or graph
    #[error("Start error: {0}")]
    Start(#[from] StartError),

    /// Stage failures reported when stopping
    #[error("Stop error: {0}")]
    Stop(#[from] StopError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Errors while installing the tracing subscriber
    #[error("Logging error: {0}")]
    Logging(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CvInferError>,
    },
}

impl CvInferError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CvInferError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for cvinfer-rs operations
pub type Result<T> = std::result::Result<T, CvInferError>;

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
    E: Into<CvInferError>,
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
        let err = CvInferError::Config("missing section".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing section");
    }

    #[test]
    fn test_error_with_context() {
        let err = CvInferError::Config("test".to_string());
        let with_ctx = err.with_context("Failed to load engine.toml");
        assert!(with_ctx.to_string().starts_with("Failed to load engine.toml"));
    }

    #[test]
    fn test_pipeline_errors_convert() {
        let result: std::result::Result<(), BindError> = Err(BindError::CycleDetected);
        let err = result.context("binding demo graph").unwrap_err();
        match err {
            CvInferError::WithContext { context, source } => {
                assert_eq!(context, "binding demo graph");
                assert!(matches!(*source, CvInferError::Bind(BindError::CycleDetected)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
