//! Error types for UpMan core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or running an upload
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid upload task: {0}")]
    InvalidDescriptor(String),

    #[error("Upload is already running")]
    AlreadyRunning,

    #[error("Upload has already finished")]
    AlreadyFinished,

    #[error("No Tokio runtime is available to run the upload")]
    NoRuntime,

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server rejected upload with status {status}")]
    ServerRejection { status: u16 },

    #[error("Upload was cancelled")]
    Cancelled,
}

impl UploadError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(_) | UploadError::Io(_) => true,
            UploadError::ServerRejection { status } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status of a server rejection
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UploadError::ServerRejection { status } => Some(*status),
            UploadError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<UploadError> for String {
    fn from(error: UploadError) -> Self {
        error.to_string()
    }
}
