use std::io;

use thiserror::Error;

/// Failure taxonomy for the model acquisition pipeline.
///
/// `Network`, `Timeout`, and 5xx `HttpStatus` are retryable and go through
/// the backoff policy; everything else surfaces immediately.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("http status {status}")]
    HttpStatus { status: u16 },

    #[error("timed out waiting for download data")]
    Timeout,

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("filesystem error: {0}")]
    Filesystem(#[from] io::Error),

    #[error("a download is already in progress for model '{0}'")]
    AlreadyInProgress(String),

    #[error("unknown model '{0}'")]
    NotFound(String),

    #[error("download aborted")]
    Aborted,

    #[error("all {} download sources failed: {cause}", attempted.len())]
    AllSourcesFailed {
        cause: Box<DownloadError>,
        /// Every URL tried, in the order it was tried. Consumers surface
        /// these so the user can fall back to a manual download.
        attempted: Vec<String>,
    },
}

impl DownloadError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) | DownloadError::Timeout => true,
            DownloadError::HttpStatus { status } => *status >= 500,
            _ => false,
        }
    }

    /// Stable identifier carried in UI-facing error events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::Network(_) => "network",
            DownloadError::HttpStatus { .. } => "httpStatus",
            DownloadError::Timeout => "timeout",
            DownloadError::ChecksumMismatch { .. } => "checksumMismatch",
            DownloadError::SizeMismatch { .. } => "sizeMismatch",
            DownloadError::Filesystem(_) => "filesystem",
            DownloadError::AlreadyInProgress(_) => "alreadyInProgress",
            DownloadError::NotFound(_) => "notFound",
            DownloadError::Aborted => "aborted",
            DownloadError::AllSourcesFailed { cause, .. } => cause.kind(),
        }
    }

    /// Ordered list of source URLs attempted before this failure, empty for
    /// failures that never reached the network.
    #[must_use]
    pub fn sources_attempted(&self) -> &[String] {
        match self {
            DownloadError::AllSourcesFailed { attempted, .. } => attempted,
            _ => &[],
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else if let Some(status) = err.status() {
            DownloadError::HttpStatus {
                status: status.as_u16(),
            }
        } else {
            DownloadError::Network(err.to_string())
        }
    }
}
