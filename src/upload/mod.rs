//! Folder upload pipeline
//!
//! - `types`: job request and terminal outcome
//! - `executor`: runs one job (bucket provisioning, per-file streamed upload)
//! - `scheduler`: worker pool, outcome correlation, cancellation and shutdown

mod executor;
mod scheduler;
mod types;

pub use executor::{ExecutorSettings, UploadExecutor};
pub use scheduler::{spawn_outcome_listener, UploadScheduler};
pub use types::MAX_CONCURRENT_UPLOADS;
