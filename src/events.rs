//! Events pushed to the UI and the sink abstraction that delivers them

use serde::Serialize;
use tauri::{AppHandle, Emitter};

use crate::error::UploadError;

pub const FOLDER_ADDED: &str = "folder-added";
pub const FOLDER_REMOVED: &str = "folder-removed";
pub const UPLOAD_SCHEDULED: &str = "upload-scheduled";
pub const PROGRESS_UPDATE: &str = "progress-update";
pub const UPLOAD_COMPLETED: &str = "upload-completed";
pub const UPLOAD_FAILED: &str = "upload-failed";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderAdded {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderRemoved {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadScheduled {
    pub id: String,
}

/// Progress event payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub id: String,
    /// Fraction of the current file sent, in [0, 1]
    pub fraction: f64,
    /// 1-based index of the file being sent
    pub current_file: usize,
    pub file_count: usize,
    pub elapsed_seconds: f64,
    /// Fraction of the whole folder sent, in [0, 1]
    pub overall_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadCompleted {
    pub id: String,
    pub elapsed_seconds: u64,
    pub files_uploaded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadFailed {
    pub id: String,
    pub reason: UploadError,
}

/// Everything the core reports to the shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UploadEvent {
    FolderAdded(FolderAdded),
    FolderRemoved(FolderRemoved),
    UploadScheduled(UploadScheduled),
    ProgressUpdate(ProgressUpdate),
    UploadCompleted(UploadCompleted),
    UploadFailed(UploadFailed),
}

impl UploadEvent {
    /// Event name the web view listens on
    pub fn name(&self) -> &'static str {
        match self {
            UploadEvent::FolderAdded(_) => FOLDER_ADDED,
            UploadEvent::FolderRemoved(_) => FOLDER_REMOVED,
            UploadEvent::UploadScheduled(_) => UPLOAD_SCHEDULED,
            UploadEvent::ProgressUpdate(_) => PROGRESS_UPDATE,
            UploadEvent::UploadCompleted(_) => UPLOAD_COMPLETED,
            UploadEvent::UploadFailed(_) => UPLOAD_FAILED,
        }
    }

    /// Selection id the event belongs to
    pub fn id(&self) -> &str {
        match self {
            UploadEvent::FolderAdded(e) => &e.id,
            UploadEvent::FolderRemoved(e) => &e.id,
            UploadEvent::UploadScheduled(e) => &e.id,
            UploadEvent::ProgressUpdate(e) => &e.id,
            UploadEvent::UploadCompleted(e) => &e.id,
            UploadEvent::UploadFailed(e) => &e.id,
        }
    }
}

/// Fire-and-forget consumer of [`UploadEvent`]s.
///
/// Called synchronously from upload workers, including once per streamed
/// chunk, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UploadEvent);
}

/// Forwards events to the web view
pub struct TauriEventSink {
    app: AppHandle,
}

impl TauriEventSink {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl EventSink for TauriEventSink {
    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.app.emit(event.name(), &event) {
            log::warn!("emit_failed: {} id={} error={}", event.name(), event.id(), e);
        }
    }
}
