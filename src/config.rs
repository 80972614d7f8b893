//! Uploader settings: defaults, `uploader.json` in the app config dir, then
//! `UPLOADER_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{UploadError, UploadResult};
use crate::upload::MAX_CONCURRENT_UPLOADS;

pub const CONFIG_FILE_NAME: &str = "uploader.json";

pub const DEFAULT_REGION: &str = "eu-west-1";
pub const DEFAULT_PROGRESS_THRESHOLD: f64 = 0.05;

const ENV_ACCESS_KEY_ID: &str = "UPLOADER_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "UPLOADER_SECRET_ACCESS_KEY";
const ENV_USE_TLS: &str = "UPLOADER_USE_TLS";
const ENV_REGION: &str = "UPLOADER_REGION";
const ENV_WORKERS: &str = "UPLOADER_WORKERS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// Emit only when the fraction moved past the threshold
    Throttled,
    /// Emit on every chunk read
    EveryChunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub use_tls: bool,
    pub region: String,
    pub worker_count: usize,
    pub shutdown_timeout_secs: u64,
    pub progress_mode: ProgressMode,
    pub progress_threshold: f64,
    pub presign_expiry_secs: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            use_tls: false,
            region: DEFAULT_REGION.to_string(),
            worker_count: MAX_CONCURRENT_UPLOADS,
            shutdown_timeout_secs: 10,
            progress_mode: ProgressMode::Throttled,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
            presign_expiry_secs: 3600,
        }
    }
}

impl UploaderConfig {
    /// Load `uploader.json` from `dir` (if present) and apply environment overrides.
    pub fn load(dir: &Path) -> UploadResult<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<UploaderConfig>(&raw).map_err(|e| {
                UploadError::invalid_config(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("config_default: no {} found", path.display());
                UploaderConfig::default()
            }
            Err(e) => return Err(UploadError::io(path.display().to_string(), &e)),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `UPLOADER_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> UploadResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_ACCESS_KEY_ID) {
            self.access_key_id = v;
        }
        if let Some(v) = lookup(ENV_SECRET_ACCESS_KEY) {
            self.secret_access_key = v;
        }
        if let Some(v) = lookup(ENV_REGION) {
            self.region = v;
        }
        if let Some(v) = lookup(ENV_USE_TLS) {
            self.use_tls = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(UploadError::invalid_config(format!(
                        "{} must be a boolean, got {}",
                        ENV_USE_TLS, other
                    )))
                }
            };
        }
        if let Some(v) = lookup(ENV_WORKERS) {
            self.worker_count = v.parse().map_err(|_| {
                UploadError::invalid_config(format!("{} must be a number, got {}", ENV_WORKERS, v))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> UploadResult<()> {
        if self.worker_count == 0 {
            return Err(UploadError::invalid_config("worker_count must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.progress_threshold) {
            return Err(UploadError::invalid_config(
                "progress_threshold must be in [0, 1)",
            ));
        }
        if self.region.is_empty() {
            return Err(UploadError::invalid_config("region must not be empty"));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }

    /// Copy safe to hand to the UI
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.secret_access_key.is_empty() {
            copy.secret_access_key = "********".to_string();
        }
        copy
    }
}
