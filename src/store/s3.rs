//! S3-compatible store: bucket provisioning through aws-sdk-s3, objects sent
//! as a single streamed PUT to a presigned URL so every chunk is observable.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::StreamExt;
use reqwest::Body;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::s3_client::{build_endpoint_url, create_s3_client, S3ClientConfig};
use super::{
    BucketCreation, Credentials, ObjectStore, ObjectStoreConnector, ProgressFn, PutOptions,
    StoreError,
};

/// Read size for hashing and streaming
const CHUNK_SIZE: usize = 64 * 1024;

/// Default bucket location; S3 rejects it as an explicit constraint
const US_EAST_1: &str = "us-east-1";

fn classify<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StoreError::Unreachable(DisplayErrorContext(&err).to_string())
        }
        _ => StoreError::Rejected(DisplayErrorContext(&err).to_string()),
    }
}

fn classify_http(err: reqwest::Error, cancel: &CancellationToken) -> StoreError {
    if cancel.is_cancelled() {
        return StoreError::Cancelled;
    }
    if err.is_connect() || err.is_timeout() {
        StoreError::Unreachable(err.to_string())
    } else {
        StoreError::Rejected(err.to_string())
    }
}

/// Base64 SHA-256 of the file, as expected by `x-amz-checksum-sha256`
async fn sha256_base64(path: &Path, cancel: &CancellationToken) -> Result<String, StoreError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(BASE64.encode(hasher.finalize()))
}

pub struct S3ObjectStore {
    client: Client,
    http: reqwest::Client,
    presign_expiry: Duration,
}

impl S3ObjectStore {
    pub fn new(client: Client, http: reqwest::Client, presign_expiry: Duration) -> Self {
        Self {
            client,
            http,
            presign_expiry,
        }
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
        checksum: Option<String>,
    ) -> Result<(String, Vec<(String, String)>), StoreError> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(self.presign_expiry)
            .build()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(&options.content_type)
            .set_checksum_sha256(checksum)
            .presigned(presigning_config)
            .await
            .map_err(classify)?;

        let headers = presigned
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Ok((presigned.uri().to_string(), headers))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<BucketCreation, StoreError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 is the default location and must not be sent explicitly
        if region != US_EAST_1 {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(BucketCreation::Created),
            Err(SdkError::ServiceError(service))
                if matches!(
                    service.err(),
                    CreateBucketError::BucketAlreadyOwnedByYou(_)
                ) =>
            {
                Ok(BucketCreation::AlreadyOwned)
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service))
                if matches!(service.err(), HeadBucketError::NotFound(_))
                    || service.raw().status().as_u16() == 404 =>
            {
                Ok(false)
            }
            Err(err) => Err(classify(err)),
        }
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
        let checksum = if options.verify_checksum {
            Some(sha256_base64(path, cancel).await?)
        } else {
            None
        };
        let (url, headers) = self.presign_put(bucket, key, options, checksum).await?;

        let file = File::open(path).await?;
        let cancel_for_stream = cancel.clone();
        let stream = ReaderStream::with_capacity(file, CHUNK_SIZE).map(move |chunk| {
            if cancel_for_stream.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
            }
            let chunk = chunk?;
            progress(chunk.len() as u64);
            Ok(chunk)
        });

        let mut request = self
            .http
            .put(&url)
            .header("content-length", options.size)
            .body(Body::wrap_stream(stream));
        for (name, value) in &headers {
            if !name.eq_ignore_ascii_case("content-length") {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        log::debug!("put_object_start: {}/{} size={}", bucket, key, options.size);
        let response = request
            .send()
            .await
            .map_err(|e| classify_http(e, cancel))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected(format!("{} - {}", status, text)));
        }
        Ok(())
    }
}

/// Builds [`S3ObjectStore`]s with static credentials
pub struct S3Connector {
    presign_expiry: Duration,
}

impl S3Connector {
    pub fn new(presign_expiry: Duration) -> Self {
        Self { presign_expiry }
    }

    fn build_store(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        region: &str,
        use_tls: bool,
    ) -> Result<S3ObjectStore, StoreError> {
        if endpoint.trim().is_empty() {
            return Err(StoreError::Unreachable("endpoint is empty".to_string()));
        }
        let endpoint_url = build_endpoint_url(endpoint.trim(), use_tls);
        log::info!("store_connect: {} region={}", endpoint_url, region);

        let client = create_s3_client(&S3ClientConfig {
            access_key_id: &credentials.access_key_id,
            secret_access_key: &credentials.secret_access_key,
            region,
            endpoint_url: &endpoint_url,
            force_path_style: true,
        });

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        Ok(S3ObjectStore::new(client, http, self.presign_expiry))
    }
}

#[async_trait]
impl ObjectStoreConnector for S3Connector {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        region: &str,
        use_tls: bool,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let store: Arc<dyn ObjectStore> =
            Arc::new(self.build_store(endpoint, credentials, region, use_tls)?);
        Ok(store)
    }
}
