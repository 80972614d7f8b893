//! Test doubles: a recording event sink and a scripted in-memory object store

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, ProgressUpdate, UploadCompleted, UploadEvent};
use crate::store::{
    BucketCreation, Credentials, ObjectStore, ObjectStoreConnector, ProgressFn, PutOptions,
    StoreError,
};

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<UploadEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<UploadEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self, id: &str) -> Vec<ProgressUpdate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::ProgressUpdate(p) if p.id == id => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn fractions(&self, id: &str) -> Vec<f64> {
        self.progress(id).iter().map(|p| p.fraction).collect()
    }

    pub fn completed(&self, id: &str) -> Vec<UploadCompleted> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::UploadCompleted(c) if c.id == id => Some(c),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: UploadEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory store. Buckets listed in `buckets` already exist and make
/// `create_bucket` fail the way a real service does.
pub struct FakeStore {
    pub buckets: Mutex<HashSet<String>>,
    pub deny_create: bool,
    pub fail_key: Option<String>,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub create_attempts: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub checksum_requested: AtomicBool,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(HashSet::new()),
            deny_create: false,
            fail_key: None,
            chunk_size: 1024,
            chunk_delay: Duration::ZERO,
            uploads: Mutex::new(Vec::new()),
            create_attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            checksum_requested: AtomicBool::new(false),
        }
    }
}

impl FakeStore {
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        self
    }

    pub fn uploaded_keys(&self, bucket: &str) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, _, _)| b == bucket)
            .map(|(_, k, _)| k.clone())
            .collect()
    }

    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn checksum_requested(&self) -> bool {
        self.checksum_requested.load(Ordering::SeqCst)
    }

    async fn send_chunks(
        &self,
        data: &[u8],
        progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        for chunk in data.chunks(self.chunk_size.max(1)) {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            progress(chunk.len() as u64);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn create_bucket(&self, bucket: &str, _region: &str) -> Result<BucketCreation, StoreError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.deny_create {
            return Err(StoreError::Rejected("AccessDenied".to_string()));
        }
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains(bucket) {
            return Err(StoreError::Rejected("BucketAlreadyExists".to_string()));
        }
        buckets.insert(bucket.to_string());
        Ok(BucketCreation::Created)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.buckets.lock().unwrap().contains(bucket))
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        options: &PutOptions,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        if options.verify_checksum {
            self.checksum_requested.store(true, Ordering::SeqCst);
        }
        if self.fail_key.as_deref() == Some(key) {
            return Err(StoreError::Rejected("connection reset".to_string()));
        }
        let data = tokio::fs::read(path).await?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.send_chunks(&data, &progress, cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result?;

        self.uploads
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string(), data.len()));
        Ok(())
    }
}

pub struct FakeConnector {
    store: Arc<FakeStore>,
    unreachable: HashSet<String>,
    pub regions: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(store: Arc<FakeStore>) -> Self {
        Self {
            store,
            unreachable: HashSet::new(),
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_unreachable(mut self, endpoint: &str) -> Self {
        self.unreachable.insert(endpoint.to_string());
        self
    }
}

#[async_trait]
impl ObjectStoreConnector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &str,
        _credentials: &Credentials,
        region: &str,
        _use_tls: bool,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        self.regions.lock().unwrap().push(region.to_string());
        if self.unreachable.contains(endpoint) {
            return Err(StoreError::Unreachable(format!("connection refused: {}", endpoint)));
        }
        let store: Arc<dyn ObjectStore> = self.store.clone();
        Ok(store)
    }
}
