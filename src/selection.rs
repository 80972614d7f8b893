//! Folders picked for upload, keyed by an opaque request id

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{UploadError, UploadResult};
use crate::events::{EventSink, FolderAdded, FolderRemoved, UploadEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

/// Snapshot of a selected folder and the files found in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedFolder {
    pub id: String,
    pub folder_path: String,
    pub files: Vec<FileEntry>,
}

/// List the regular files of `path`, sorted by name.
///
/// Subdirectories are skipped: objects are stored under the bare file name.
pub async fn list_directory(path: &Path) -> UploadResult<Vec<FileEntry>> {
    let display = path.display().to_string();
    let mut dir = tokio::fs::read_dir(path)
        .await
        .map_err(|e| UploadError::io(&display, &e))?;

    let mut files = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| UploadError::io(&display, &e))?
    {
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| UploadError::io(entry.path().display().to_string(), &e))?;
        if !metadata.is_file() {
            log::debug!("list_directory_skip: {}", entry.path().display());
            continue;
        }
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Thread-safe registry of selections shared by commands and upload workers
pub struct SelectionRegistry {
    folders: Mutex<HashMap<String, SelectedFolder>>,
    events: Arc<dyn EventSink>,
}

impl SelectionRegistry {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            folders: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn folders(&self) -> MutexGuard<'_, HashMap<String, SelectedFolder>> {
        self.folders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a folder snapshot under a fresh id and announce it
    pub fn add_selection(&self, folder_path: &str, files: Vec<FileEntry>) -> String {
        let id = Uuid::new_v4().to_string();

        for file in &files {
            log::debug!("selection_file: {} {} ({} bytes)", id, file.name, file.size);
        }
        log::info!(
            "selection_added: {} path={} files={}",
            id,
            folder_path,
            files.len()
        );

        self.folders().insert(
            id.clone(),
            SelectedFolder {
                id: id.clone(),
                folder_path: folder_path.to_string(),
                files,
            },
        );

        self.events.emit(UploadEvent::FolderAdded(FolderAdded {
            id: id.clone(),
            path: folder_path.to_string(),
        }));
        id
    }

    /// Forget a selection. Unknown ids are ignored.
    pub fn remove_selection(&self, id: &str) {
        let removed = self.folders().remove(id);
        match removed {
            Some(folder) => log::info!("selection_removed: {} path={}", id, folder.folder_path),
            None => log::debug!("selection_remove_unknown: {}", id),
        }
        self.events.emit(UploadEvent::FolderRemoved(FolderRemoved {
            id: id.to_string(),
        }));
    }

    pub fn get(&self, id: &str) -> UploadResult<SelectedFolder> {
        self.folders()
            .get(id)
            .cloned()
            .ok_or_else(|| UploadError::not_found(id))
    }

    pub fn list(&self) -> Vec<SelectedFolder> {
        let mut folders: Vec<SelectedFolder> = self.folders().values().cloned().collect();
        folders.sort_by(|a, b| a.folder_path.cmp(&b.folder_path));
        folders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use std::collections::HashSet;

    fn registry() -> (SelectionRegistry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (SelectionRegistry::new(sink.clone()), sink)
    }

    fn entry(name: &str, size: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn ids_are_distinct_and_removal_forgets_them() {
        let (registry, _) = registry();
        let ids: Vec<String> = (0..64)
            .map(|i| registry.add_selection(&format!("/data/{}", i), vec![]))
            .collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let id = &ids[7];
        assert_eq!(registry.get(id).unwrap().folder_path, "/data/7");
        registry.remove_selection(id);
        assert_eq!(
            registry.get(id).unwrap_err(),
            UploadError::NotFound { id: id.clone() }
        );
    }

    #[test]
    fn add_and_remove_emit_events() {
        let (registry, sink) = registry();
        let id = registry.add_selection("/scans", vec![entry("a.tif", 10)]);
        registry.remove_selection(&id);
        registry.remove_selection("never-added");

        let names: Vec<&str> = sink.events().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["folder-added", "folder-removed", "folder-removed"]);
        assert_eq!(
            sink.events()[0],
            UploadEvent::FolderAdded(FolderAdded {
                id: id.clone(),
                path: "/scans".to_string()
            })
        );
    }

    #[test]
    fn concurrent_access_is_safe() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = registry.add_selection(&format!("/t{}/{}", t, i), vec![]);
                        assert!(registry.get(&id).is_ok());
                        if i % 2 == 0 {
                            registry.remove_selection(&id);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.list().len(), 8 * 25);
    }

    #[tokio::test]
    async fn list_directory_keeps_sorted_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.dat"), vec![0u8; 5000]).unwrap();
        std::fs::write(dir.path().join("a.dat"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("c.dat"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_directory(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![entry("a.dat", 10), entry("b.dat", 5000), entry("c.dat", 0)]
        );
    }

    #[tokio::test]
    async fn unreadable_directory_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let err = list_directory(&missing).await.unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }
}
