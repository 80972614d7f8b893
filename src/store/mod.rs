//! Object store capability used by the upload executor
//!
//! - `s3_client`: aws-sdk-s3 client construction
//! - `s3`: S3-compatible implementation (bucket provisioning, streamed PUT)

mod s3;
mod s3_client;

pub use s3::S3Connector;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Called with the size of every chunk read from the source file
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The endpoint could not be reached (DNS, connect, TLS, timeout)
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The service answered with an error
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketCreation {
    Created,
    /// The bucket already exists and belongs to these credentials
    AlreadyOwned,
}

#[derive(Debug, Clone)]
pub struct PutOptions {
    pub content_type: String,
    pub verify_checksum: bool,
    /// Size stat'ed just before the transfer
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<BucketCreation, StoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Stream `path` to `bucket/key`, calling `progress` for each chunk read
    /// and stopping with [`StoreError::Cancelled`] once `cancel` fires.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        options: &PutOptions,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}

/// Creates a store client for one endpoint. Requests are signed for `region`.
#[async_trait]
pub trait ObjectStoreConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        region: &str,
        use_tls: bool,
    ) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
