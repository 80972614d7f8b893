//! Tauri commands module
//!
//! - `selection_commands`: folder picking and selection bookkeeping
//! - `upload_commands`: scheduling uploads and reading settings

mod selection_commands;
mod upload_commands;

pub use selection_commands::*;
pub use upload_commands::*;
