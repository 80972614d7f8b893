use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::UploaderConfig;
use crate::events::EventSink;
use crate::selection::SelectionRegistry;
use crate::upload::UploadScheduler;

/// Shared services handed to commands and window handlers
pub struct AppState {
    pub config: UploaderConfig,
    pub registry: Arc<SelectionRegistry>,
    pub scheduler: Arc<UploadScheduler>,
    pub events: Arc<dyn EventSink>,
    pub is_quitting: AtomicBool,
}

impl AppState {
    pub fn new(
        config: UploaderConfig,
        registry: Arc<SelectionRegistry>,
        scheduler: Arc<UploadScheduler>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            registry,
            scheduler,
            events,
            is_quitting: AtomicBool::new(false),
        }
    }
}
