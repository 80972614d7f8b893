use std::sync::atomic::Ordering;
use std::sync::Arc;
use tauri::{Manager, WindowEvent};

mod commands;
mod config;
mod error;
mod events;
mod logging;
mod progress;
mod selection;
mod state;
mod store;
mod upload;

#[cfg(test)]
mod test_support;

use config::UploaderConfig;
use events::{EventSink, TauriEventSink};
use selection::SelectionRegistry;
use state::AppState;
use store::S3Connector;
use upload::{ExecutorSettings, UploadExecutor, UploadScheduler};

const QUIT_TITLE: &str = "Quit?";
const QUIT_MESSAGE: &str = "Are you sure you want to quit? This will stop all pending uploads.";

fn build_state(app: &tauri::App) -> Result<AppState, Box<dyn std::error::Error>> {
    let config_dir = app.path().app_config_dir()?;
    let config = UploaderConfig::load(&config_dir)?;
    log::info!("config_loaded: {:?}", config.redacted());

    let events: Arc<dyn EventSink> = Arc::new(TauriEventSink::new(app.handle().clone()));
    let registry = Arc::new(SelectionRegistry::new(events.clone()));
    let connector = Arc::new(S3Connector::new(config.presign_expiry()));
    let executor = Arc::new(UploadExecutor::new(
        registry.clone(),
        connector,
        events.clone(),
        ExecutorSettings::from(&config),
    ));

    let worker_count = config.worker_count;
    let scheduler = tauri::async_runtime::block_on({
        let registry = registry.clone();
        let events = events.clone();
        async move { UploadScheduler::start(worker_count, registry, executor, events) }
    })?;

    Ok(AppState::new(config, registry, Arc::new(scheduler), events))
}

/// Ask before closing while uploads are running or queued
fn confirm_quit(app: &tauri::AppHandle) {
    use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};

    let handle = app.clone();
    app.dialog()
        .message(QUIT_MESSAGE)
        .title(QUIT_TITLE)
        .kind(MessageDialogKind::Warning)
        .buttons(MessageDialogButtons::OkCancel)
        .show(move |confirmed| {
            if !confirmed {
                return;
            }
            let state = handle.state::<AppState>();
            state.is_quitting.store(true, Ordering::SeqCst);
            let scheduler = state.scheduler.clone();
            let timeout = state.config.shutdown_timeout();
            let handle = handle.clone();
            tauri::async_runtime::spawn(async move {
                scheduler.shutdown(timeout).await;
                handle.exit(0);
            });
        });
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    logging::init();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let state = build_state(app)?;
            app.manage(state);
            Ok(())
        })
        .on_window_event(|window, event| {
            if let WindowEvent::CloseRequested { api, .. } = event {
                let app = window.app_handle();
                let state = app.state::<AppState>();
                if state.is_quitting.load(Ordering::SeqCst) || !state.scheduler.is_busy() {
                    return;
                }
                api.prevent_close();
                confirm_quit(app);
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::select_folder,
            commands::remove_upload,
            commands::list_selections,
            commands::schedule_upload,
            commands::get_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
