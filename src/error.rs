// src/error.rs
// Error taxonomy for the pipeline. Only `Transient` is ever retried;
// `Timeout` is a distinct outcome so callers can tell "didn't finish"
// from "failed".

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fatal misconfiguration (missing credentials, bad limiter parameters).
    /// Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transient upstream failure. Retried with exponential backoff up to
    /// the configured attempt count.
    #[error("transient source error: {0}")]
    Transient(String),

    /// Malformed data. Logged and skipped; never aborts a batch.
    #[error("data integrity error: {0}")]
    Integrity(String),

    /// A deadline or rate-limit wait elapsed before the work finished.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Whether the retry loop may run this work again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short tag used in task records and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Transient(_) => "transient",
            Self::Integrity(_) => "integrity",
            Self::Timeout(_) => "timeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(PipelineError::transient("503").is_retryable());
        assert!(!PipelineError::config("no api key").is_retryable());
        assert!(!PipelineError::integrity("bad row").is_retryable());
        assert!(!PipelineError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
