//! Error taxonomy for selections, scheduling and uploads.

use serde::Serialize;
use thiserror::Error;

pub type UploadResult<T> = Result<T, UploadError>;

/// Every failure a job or a shell command can surface.
///
/// Errors are `Clone + Serialize` so they can ride inside upload outcomes
/// and `upload-failed` events.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadError {
    /// Unknown selection id.
    #[error("selection not found: {id}")]
    NotFound { id: String },

    /// Reading a directory failed.
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("endpoint {endpoint} is unreachable: {message}")]
    EndpointUnreachable { endpoint: String, message: String },

    #[error("failed to provision bucket {bucket}: {message}")]
    BucketProvisioningFailed { bucket: String, message: String },

    #[error("failed to upload {file_name}: {cause}")]
    FileTransferFailed { file_name: String, cause: String },

    #[error("cannot read source file {path}: {message}")]
    SourceFileUnreadable { path: String, message: String },

    #[error("upload cancelled")]
    Cancelled,

    /// A job for this selection is still queued or running.
    #[error("upload already scheduled: {id}")]
    AlreadyScheduled { id: String },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl UploadError {
    pub(crate) fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        UploadError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn not_found(id: &str) -> Self {
        UploadError::NotFound { id: id.to_string() }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        UploadError::InvalidConfig {
            message: message.into(),
        }
    }
}
