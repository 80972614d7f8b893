use std::path::PathBuf;
use tauri::{AppHandle, State};

use crate::selection::{list_directory, SelectedFolder};
use crate::state::AppState;

/// Pick a folder with the native dialog and register its files.
/// Returns `None` when the dialog is dismissed.
#[tauri::command]
pub async fn select_folder(
    app: AppHandle,
    state: State<'_, AppState>,
) -> Result<Option<SelectedFolder>, String> {
    use tauri_plugin_dialog::DialogExt;

    let (tx, rx) = tokio::sync::oneshot::channel();

    app.dialog()
        .file()
        .set_title("Select Folder to Upload")
        .pick_folder(move |folder_path| {
            let result = folder_path.and_then(|p| p.into_path().ok());
            let _ = tx.send(result);
        });

    let picked: Option<PathBuf> = rx.await.map_err(|_| "Dialog was closed".to_string())?;
    let Some(folder) = picked else {
        log::debug!("select_folder_dismissed");
        return Ok(None);
    };

    let files = list_directory(&folder).await.map_err(|e| e.to_string())?;
    let folder_path = folder.to_string_lossy().to_string();
    let id = state.registry.add_selection(&folder_path, files);

    state.registry.get(&id).map(Some).map_err(|e| e.to_string())
}

/// Drop a selection. Already-running uploads of it are unaffected.
#[tauri::command]
pub fn remove_upload(id: String, state: State<'_, AppState>) -> Result<(), String> {
    state.registry.remove_selection(&id);
    Ok(())
}

#[tauri::command]
pub fn list_selections(state: State<'_, AppState>) -> Result<Vec<SelectedFolder>, String> {
    Ok(state.registry.list())
}
