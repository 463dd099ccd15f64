//! Error taxonomy for the dataset pipeline.
//!
//! Every per-file failure in a batch operation is caught by the batch
//! loop and materialized as a sidecar file or log event; none of these
//! variants is allowed to escape a batch boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The document could not be read or recognized as a score.
    #[error("parse error: {0}")]
    Parse(String),

    /// An external renderer binary was missing or exited non-zero.
    /// Captured stdout/stderr are surfaced in the message; the
    /// orchestrator never retries.
    #[error("{tool} render failed: {message}")]
    RenderTool { tool: String, message: String },

    /// Malformed vector-layout markup. Callers degrade this to
    /// "zero bbox candidates" rather than aborting.
    #[error("layout parse error in '{}': {message}", .path.display())]
    LayoutParse { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Shorthand used by the parsing layer.
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
