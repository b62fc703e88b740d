//! Error types for the screenshot pipeline.

use thiserror::Error;

/// A rejected rendering request. Raised before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    Missing(&'static str),
    #[error("invalid url '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("failed to parse {field} as boolean: {value}")]
    ParseBool { field: &'static str, value: String },
    #[error("failed to parse {field} as number: {value}")]
    ParseNumber { field: &'static str, value: String },
}

/// Failures surfaced by [`crate::renderer::ScreenshotService`].
///
/// Every variant past `Validation` aborts a single render attempt. Cleanup of
/// the browser session and the scheduler ticket happens regardless of which
/// variant fired.
#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to fetch block list {source_url}: {message}")]
    BlockListFetch { source_url: String, message: String },

    #[error("navigation to {url} did not settle within {timeout_secs}s")]
    NavigationTimeout { url: String, timeout_secs: u64 },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("artifact not found: {key}")]
    ArtifactNotFound { key: String },

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("render scheduler is closed")]
    SchedulerClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScreenshotError {
    /// Short machine-readable kind, used for logs and HTTP error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::BlockListFetch { .. } => "block_list_fetch",
            Self::NavigationTimeout { .. } => "navigation_timeout",
            Self::Capture(_) => "capture",
            Self::ArtifactNotFound { .. } => "artifact_not_found",
            Self::Storage(_) => "storage",
            Self::Browser(_) => "browser",
            Self::SchedulerClosed => "scheduler_closed",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<chromiumoxide::error::CdpError> for ScreenshotError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(err.to_string())
    }
}
