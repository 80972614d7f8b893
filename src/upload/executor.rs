//! Upload executor - provisions the bucket and sends one folder file by file

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ProgressMode, UploaderConfig};
use crate::error::{UploadError, UploadResult};
use crate::events::{EventSink, UploadCompleted, UploadEvent};
use crate::progress::ProgressTracker;
use crate::selection::SelectionRegistry;
use crate::store::{
    BucketCreation, Credentials, ObjectStore, ObjectStoreConnector, ProgressFn, PutOptions,
    StoreError, DEFAULT_CONTENT_TYPE,
};

use super::types::{UploadOutcome, UploadRequest};

/// Connection and progress settings shared by all jobs
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub credentials: Credentials,
    pub use_tls: bool,
    pub region: String,
    pub progress_mode: ProgressMode,
    pub progress_threshold: f64,
}

impl From<&UploaderConfig> for ExecutorSettings {
    fn from(config: &UploaderConfig) -> Self {
        Self {
            credentials: Credentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
            },
            use_tls: config.use_tls,
            region: config.region.clone(),
            progress_mode: config.progress_mode,
            progress_threshold: config.progress_threshold,
        }
    }
}

pub struct UploadExecutor {
    registry: Arc<SelectionRegistry>,
    connector: Arc<dyn ObjectStoreConnector>,
    events: Arc<dyn EventSink>,
    settings: ExecutorSettings,
}

impl UploadExecutor {
    pub fn new(
        registry: Arc<SelectionRegistry>,
        connector: Arc<dyn ObjectStoreConnector>,
        events: Arc<dyn EventSink>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            connector,
            events,
            settings,
        }
    }

    /// Run one job to its outcome. Never panics on store or filesystem errors.
    pub async fn execute(&self, request: &UploadRequest, cancel: &CancellationToken) -> UploadOutcome {
        let start = Instant::now();
        match self.upload_folder(request, cancel).await {
            Ok(files_uploaded) => {
                let elapsed_seconds = start.elapsed().as_secs();
                log::info!(
                    "upload_completed: {} files={} elapsed={}s",
                    request.id,
                    files_uploaded,
                    elapsed_seconds
                );
                self.events.emit(UploadEvent::UploadCompleted(UploadCompleted {
                    id: request.id.clone(),
                    elapsed_seconds,
                    files_uploaded,
                }));
                UploadOutcome::Completed {
                    id: request.id.clone(),
                    files_uploaded,
                    elapsed_seconds,
                }
            }
            Err(reason) => {
                log::warn!("upload_failed: {} error={}", request.id, reason);
                UploadOutcome::failed(&request.id, reason)
            }
        }
    }

    async fn upload_folder(
        &self,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> UploadResult<usize> {
        let folder = self.registry.get(&request.id)?;
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        log::info!("upload_connect: {} endpoint={}", request.id, request.endpoint);
        let store = self
            .connector
            .connect(
                &request.endpoint,
                &self.settings.credentials,
                &self.settings.region,
                self.settings.use_tls,
            )
            .await
            .map_err(|e| endpoint_unreachable(&request.endpoint, e))?;

        self.provision_bucket(store.as_ref(), request).await?;

        let file_count = folder.files.len();
        let tracker = Arc::new(Mutex::new(ProgressTracker::new(
            &request.id,
            file_count,
            self.settings.progress_mode,
            self.settings.progress_threshold,
            self.events.clone(),
        )));

        for (idx, file) in folder.files.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("upload_cancelled: {} before file {}", request.id, file.name);
                return Err(UploadError::Cancelled);
            }

            let file_path = Path::new(&folder.folder_path).join(&file.name);
            let metadata = tokio::fs::metadata(&file_path).await.map_err(|e| {
                UploadError::SourceFileUnreadable {
                    path: file_path.display().to_string(),
                    message: e.to_string(),
                }
            })?;
            if !metadata.is_file() {
                return Err(UploadError::SourceFileUnreadable {
                    path: file_path.display().to_string(),
                    message: "not a regular file".to_string(),
                });
            }
            let size = metadata.len();

            log::info!(
                "progress: {} of {} ({}) id={}",
                idx + 1,
                file_count,
                file.name,
                request.id
            );
            lock(&tracker).begin_file(idx + 1, size);

            let tracker_for_chunks = tracker.clone();
            let progress: ProgressFn = Arc::new(move |n| lock(&tracker_for_chunks).record(n));
            let options = PutOptions {
                content_type: DEFAULT_CONTENT_TYPE.to_string(),
                verify_checksum: request.verify_checksum,
                size,
            };

            store
                .put_file(
                    &request.bucket_name,
                    &file.name,
                    &file_path,
                    &options,
                    progress,
                    cancel,
                )
                .await
                .map_err(|e| match e {
                    StoreError::Cancelled => UploadError::Cancelled,
                    other => UploadError::FileTransferFailed {
                        file_name: file.name.clone(),
                        cause: other.to_string(),
                    },
                })?;

            lock(&tracker).finish_file();
        }

        Ok(file_count)
    }

    /// Create the bucket, accepting one that already exists
    async fn provision_bucket(
        &self,
        store: &dyn ObjectStore,
        request: &UploadRequest,
    ) -> UploadResult<()> {
        let bucket = &request.bucket_name;
        let create_err = match store.create_bucket(bucket, &self.settings.region).await {
            Ok(BucketCreation::Created) => {
                log::info!("bucket_created: {}", bucket);
                return Ok(());
            }
            Ok(BucketCreation::AlreadyOwned) => {
                log::info!("bucket_exists: we already own {}", bucket);
                return Ok(());
            }
            Err(StoreError::Unreachable(message)) => {
                return Err(UploadError::EndpointUnreachable {
                    endpoint: request.endpoint.clone(),
                    message,
                })
            }
            Err(e) => e,
        };

        match store.bucket_exists(bucket).await {
            Ok(true) => {
                log::info!("bucket_exists: we already own {}", bucket);
                Ok(())
            }
            Ok(false) => Err(UploadError::BucketProvisioningFailed {
                bucket: bucket.clone(),
                message: create_err.to_string(),
            }),
            Err(StoreError::Unreachable(message)) => Err(UploadError::EndpointUnreachable {
                endpoint: request.endpoint.clone(),
                message,
            }),
            Err(e) => Err(UploadError::BucketProvisioningFailed {
                bucket: bucket.clone(),
                message: format!("{}; existence check failed: {}", create_err, e),
            }),
        }
    }
}

fn endpoint_unreachable(endpoint: &str, err: StoreError) -> UploadError {
    UploadError::EndpointUnreachable {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    }
}

fn lock(tracker: &Mutex<ProgressTracker>) -> std::sync::MutexGuard<'_, ProgressTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::FileEntry;
    use crate::test_support::{FakeConnector, FakeStore, RecordingSink};

    struct Fixture {
        registry: Arc<SelectionRegistry>,
        connector: Arc<FakeConnector>,
        sink: Arc<RecordingSink>,
        store: Arc<FakeStore>,
        executor: UploadExecutor,
        dir: tempfile::TempDir,
    }

    fn fixture(store: FakeStore, connector: impl FnOnce(Arc<FakeStore>) -> FakeConnector) -> Fixture {
        let sink = Arc::new(RecordingSink::default());
        let registry = Arc::new(SelectionRegistry::new(sink.clone()));
        let store = Arc::new(store);
        let connector = Arc::new(connector(store.clone()));
        let settings = ExecutorSettings {
            credentials: Credentials {
                access_key_id: "minio".to_string(),
                secret_access_key: "minio-secret".to_string(),
            },
            use_tls: false,
            region: "eu-west-1".to_string(),
            progress_mode: ProgressMode::Throttled,
            progress_threshold: 0.05,
        };
        let executor =
            UploadExecutor::new(registry.clone(), connector.clone(), sink.clone(), settings);
        Fixture {
            registry,
            connector,
            sink,
            store,
            executor,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn select(fixture: &Fixture, files: &[(&str, usize)]) -> UploadRequest {
        let mut entries = Vec::new();
        for (name, size) in files {
            std::fs::write(fixture.dir.path().join(name), vec![7u8; *size]).unwrap();
            entries.push(FileEntry {
                name: name.to_string(),
                size: *size as u64,
            });
        }
        let folder_path = fixture.dir.path().display().to_string();
        let id = fixture.registry.add_selection(&folder_path, entries);
        UploadRequest {
            request_id: 1,
            id,
            endpoint: "localhost:9000".to_string(),
            bucket_name: "raw-data".to_string(),
            verify_checksum: true,
        }
    }

    #[tokio::test]
    async fn uploads_every_file_and_reports_completion() {
        let f = fixture(FakeStore::default(), FakeConnector::new);
        let request = select(&f, &[("a.bin", 10), ("b.bin", 0), ("c.bin", 5000)]);

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;

        match &outcome {
            UploadOutcome::Completed {
                id, files_uploaded, ..
            } => {
                assert_eq!(id, &request.id);
                assert_eq!(*files_uploaded, 3);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(
            f.store.uploaded_keys("raw-data"),
            vec!["a.bin".to_string(), "b.bin".to_string(), "c.bin".to_string()]
        );
        assert!(f.store.checksum_requested());

        // The empty file reports 1.0 as its first event
        let empty_file: Vec<f64> = f
            .sink
            .progress(&request.id)
            .iter()
            .filter(|p| p.current_file == 2)
            .map(|p| p.fraction)
            .collect();
        assert_eq!(empty_file, vec![1.0]);

        let completed = f.sink.completed(&request.id);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].files_uploaded, 3);

        // The store client is built for the configured region
        assert_eq!(
            *f.connector.regions.lock().unwrap(),
            vec!["eu-west-1".to_string()]
        );
    }

    #[tokio::test]
    async fn fractions_are_bounded_and_monotonic_per_file() {
        let store = FakeStore {
            chunk_size: 256,
            ..FakeStore::default()
        };
        let f = fixture(store, FakeConnector::new);
        let request = select(&f, &[("one.bin", 4096), ("two.bin", 1000)]);

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;
        assert!(outcome.is_completed());

        let updates = f.sink.progress(&request.id);
        for file in 1..=2 {
            let fractions: Vec<f64> = updates
                .iter()
                .filter(|p| p.current_file == file)
                .map(|p| p.fraction)
                .collect();
            assert_eq!(fractions.first(), Some(&0.0));
            assert_eq!(fractions.last(), Some(&1.0));
            assert!(fractions.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[tokio::test]
    async fn existing_owned_bucket_is_accepted() {
        let store = FakeStore::default().with_bucket("raw-data");
        let f = fixture(store, FakeConnector::new);
        let request = select(&f, &[("a.bin", 10)]);

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;
        assert!(outcome.is_completed(), "{:?}", outcome);
        assert_eq!(f.store.create_attempts(), 1);
    }

    #[tokio::test]
    async fn bucket_that_cannot_be_created_fails_the_job() {
        let store = FakeStore {
            deny_create: true,
            ..FakeStore::default()
        };
        let f = fixture(store, FakeConnector::new);
        let request = select(&f, &[("a.bin", 10)]);

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;
        assert!(matches!(
            outcome.error(),
            Some(UploadError::BucketProvisioningFailed { .. })
        ));
        assert!(f.store.uploaded_keys("raw-data").is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_failed_outcome() {
        let f = fixture(FakeStore::default(), |store| {
            FakeConnector::new(store).with_unreachable("localhost:9000")
        });
        let request = select(&f, &[("a.bin", 10)]);

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;
        assert_eq!(outcome.id(), request.id);
        assert!(matches!(
            outcome.error(),
            Some(UploadError::EndpointUnreachable { .. })
        ));
        assert!(f.sink.completed(&request.id).is_empty());
    }

    #[tokio::test]
    async fn transfer_error_aborts_remaining_files() {
        let store = FakeStore {
            fail_key: Some("b.bin".to_string()),
            ..FakeStore::default()
        };
        let f = fixture(store, FakeConnector::new);
        let request = select(&f, &[("a.bin", 10), ("b.bin", 10), ("c.bin", 10)]);

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;
        match outcome.error() {
            Some(UploadError::FileTransferFailed { file_name, .. }) => assert_eq!(file_name, "b.bin"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.store.uploaded_keys("raw-data"), vec!["a.bin".to_string()]);
    }

    #[tokio::test]
    async fn missing_source_file_is_reported() {
        let f = fixture(FakeStore::default(), FakeConnector::new);
        let request = select(&f, &[("a.bin", 10)]);
        std::fs::remove_file(f.dir.path().join("a.bin")).unwrap();

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;
        assert!(matches!(
            outcome.error(),
            Some(UploadError::SourceFileUnreadable { .. })
        ));
    }

    #[tokio::test]
    async fn removed_selection_is_not_found() {
        let f = fixture(FakeStore::default(), FakeConnector::new);
        let request = select(&f, &[("a.bin", 10)]);
        f.registry.remove_selection(&request.id);

        let outcome = f.executor.execute(&request, &CancellationToken::new()).await;
        assert_eq!(
            outcome.error(),
            Some(&UploadError::NotFound {
                id: request.id.clone()
            })
        );
    }

    #[tokio::test]
    async fn cancelled_token_stops_between_files() {
        let f = fixture(FakeStore::default(), FakeConnector::new);
        let request = select(&f, &[("a.bin", 10), ("b.bin", 10)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f.executor.execute(&request, &cancel).await;
        assert_eq!(outcome.error(), Some(&UploadError::Cancelled));
        assert!(f.store.uploaded_keys("raw-data").is_empty());
    }
}
