//! Upload job and outcome types

use serde::Serialize;

use crate::error::UploadError;

/// Default number of upload workers
pub const MAX_CONCURRENT_UPLOADS: usize = 2;

/// One folder-to-bucket upload, built when the upload is scheduled.
/// The folder and its files are resolved from the registry by `id` when a
/// worker picks the request up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Sequence number of this request, unique per scheduler
    pub request_id: u64,
    /// Selection id
    pub id: String,
    pub endpoint: String,
    pub bucket_name: String,
    pub verify_checksum: bool,
}

impl UploadRequest {
    /// Same selection going to the same bucket at the same endpoint
    pub fn same_destination(&self, other: &UploadRequest) -> bool {
        self.id == other.id
            && self.endpoint == other.endpoint
            && self.bucket_name == other.bucket_name
    }
}

/// Terminal result of exactly one job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Completed {
        id: String,
        files_uploaded: usize,
        elapsed_seconds: u64,
    },
    Failed {
        id: String,
        reason: UploadError,
    },
}

impl UploadOutcome {
    pub fn failed(id: &str, reason: UploadError) -> Self {
        UploadOutcome::Failed {
            id: id.to_string(),
            reason,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            UploadOutcome::Completed { id, .. } | UploadOutcome::Failed { id, .. } => id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed { .. })
    }

    pub fn error(&self) -> Option<&UploadError> {
        match self {
            UploadOutcome::Completed { .. } => None,
            UploadOutcome::Failed { reason, .. } => Some(reason),
        }
    }
}
