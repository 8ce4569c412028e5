//! Typed errors for the extraction library.
//!
//! The binary wraps these in `anyhow` at the edges.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of the model call itself.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing API key or an unusable client configuration
    #[error("model configuration error: {0}")]
    Config(String),

    /// Connection failure or timeout
    #[error("network error: {0}")]
    Network(String),

    /// Non-success status after the client's own retries
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The reply could not be read as JSON
    #[error("model reply is not JSON: {0}")]
    Parse(String),
}

impl ModelError {
    /// Transient failures the caller may retry.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }
}

/// Coarse classification of an [`ExtractionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    ModelUnavailable,
    MalformedResponse,
}

/// Per-email extraction failure. Never aborts a batch.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The model could not be reached; retrying may help
    #[error("model unavailable for {email_id}: {source}")]
    ModelUnavailable {
        email_id: String,
        #[source]
        source: ModelError,
    },

    /// The model answered with something that is not a field mapping
    #[error("malformed model response for {email_id}: {reason}")]
    MalformedResponse { email_id: String, reason: String },
}

impl ExtractionError {
    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            Self::ModelUnavailable { .. } => ExtractionErrorKind::ModelUnavailable,
            Self::MalformedResponse { .. } => ExtractionErrorKind::MalformedResponse,
        }
    }

    pub fn email_id(&self) -> &str {
        match self {
            Self::ModelUnavailable { email_id, .. } | Self::MalformedResponse { email_id, .. } => {
                email_id
            }
        }
    }
}

/// Evaluation wiring errors. Per-record differences are never errors.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Predictions and ground truth share no email id
    #[error("no common email ids between predictions ({predictions}) and ground truth ({ground_truth})")]
    NoCommonRecords {
        predictions: usize,
        ground_truth: usize,
    },
}

/// Loading or writing a data file failed.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for data file operations.
pub type DataResult<T> = std::result::Result<T, DataError>;
