use tauri::State;

use crate::config::UploaderConfig;
use crate::state::AppState;
use crate::upload::spawn_outcome_listener;

/// Queue the selection `id` for upload into `bucket` at `endpoint`.
/// Returns once the job is queued; progress and the outcome arrive as events.
#[tauri::command]
pub async fn schedule_upload(
    id: String,
    endpoint: String,
    bucket: String,
    md5checksum: bool,
    state: State<'_, AppState>,
) -> Result<(), String> {
    let handle = state
        .scheduler
        .schedule(&id, &endpoint, &bucket, md5checksum)
        .map_err(|e| e.to_string())?;

    spawn_outcome_listener(handle, state.events.clone());
    Ok(())
}

/// Effective settings with the secret key masked
#[tauri::command]
pub fn get_settings(state: State<'_, AppState>) -> Result<UploaderConfig, String> {
    Ok(state.config.redacted())
}
