//! Upload scheduler - fixed worker pool over a shared job queue
//!
//! Every scheduled request owns a single-slot completion channel keyed by its
//! request number, so a job's outcome only ever reaches that job's listener.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{UploadError, UploadResult};
use crate::events::{EventSink, UploadEvent, UploadFailed, UploadScheduled};
use crate::selection::SelectionRegistry;

use super::executor::UploadExecutor;
use super::types::{UploadOutcome, UploadRequest};

/// Receives the outcome of one scheduled request
pub struct OutcomeHandle {
    id: String,
    receiver: oneshot::Receiver<UploadOutcome>,
}

impl OutcomeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the outcome. A job dropped during shutdown reports `Cancelled`.
    pub async fn wait(self) -> UploadOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => UploadOutcome::failed(&self.id, UploadError::Cancelled),
        }
    }
}

/// Outstanding request and the listener waiting for it
struct PendingJob {
    request: UploadRequest,
    sender: oneshot::Sender<UploadOutcome>,
}

/// Counts a running job; released when the job ends or its worker is aborted
struct ActiveJob<'a>(&'a AtomicUsize);

impl<'a> ActiveJob<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        ActiveJob(active)
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SchedulerInner {
    registry: Arc<SelectionRegistry>,
    executor: Arc<UploadExecutor>,
    events: Arc<dyn EventSink>,
    queue: mpsc::UnboundedSender<UploadRequest>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<UploadRequest>>,
    completions: Mutex<HashMap<u64, PendingJob>>,
    next_request: AtomicU64,
    queued: AtomicUsize,
    active: AtomicUsize,
    cancel: CancellationToken,
}

impl SchedulerInner {
    fn completions(&self) -> MutexGuard<'_, HashMap<u64, PendingJob>> {
        self.completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand `outcome` to the listener registered for `request_id`
    fn complete(&self, request_id: u64, outcome: UploadOutcome) {
        let pending = self.completions().remove(&request_id);
        match pending {
            Some(pending) => {
                if pending.sender.send(outcome).is_err() {
                    log::debug!("upload_outcome_unobserved: {}", pending.request.id);
                }
            }
            None => log::warn!(
                "upload_outcome_orphaned: {} request={}",
                outcome.id(),
                request_id
            ),
        }
    }
}

pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl UploadScheduler {
    /// Spawn `worker_count` workers. Must be called inside a tokio runtime.
    pub fn start(
        worker_count: usize,
        registry: Arc<SelectionRegistry>,
        executor: Arc<UploadExecutor>,
        events: Arc<dyn EventSink>,
    ) -> UploadResult<Self> {
        if worker_count == 0 {
            return Err(UploadError::invalid_config(
                "upload scheduler needs at least one worker",
            ));
        }

        let (queue, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(SchedulerInner {
            registry,
            executor,
            events,
            queue,
            receiver: tokio::sync::Mutex::new(receiver),
            completions: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        });

        let workers = (1..=worker_count)
            .map(|worker| tokio::spawn(run_upload_worker(inner.clone(), worker)))
            .collect();
        log::info!("upload_scheduler_started: workers={}", worker_count);

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Queue an upload of the selection `id`. Returns without waiting for a worker.
    ///
    /// A selection may be uploaded to several destinations at once; only a
    /// second request for a destination that is still outstanding is refused.
    pub fn schedule(
        &self,
        id: &str,
        endpoint: &str,
        bucket: &str,
        verify_checksum: bool,
    ) -> UploadResult<OutcomeHandle> {
        if self.inner.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let folder = self.inner.registry.get(id).map_err(|e| {
            log::warn!("upload_schedule_failed: {} error={}", id, e);
            e
        })?;

        let request = UploadRequest {
            request_id: self.inner.next_request.fetch_add(1, Ordering::SeqCst),
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            bucket_name: bucket.to_string(),
            verify_checksum,
        };

        let (sender, receiver) = oneshot::channel();
        {
            let mut completions = self.inner.completions();
            if completions
                .values()
                .any(|pending| pending.request.same_destination(&request))
            {
                return Err(UploadError::AlreadyScheduled { id: id.to_string() });
            }
            completions.insert(
                request.request_id,
                PendingJob {
                    request: request.clone(),
                    sender,
                },
            );
        }

        log::info!(
            "upload_scheduled: {} request={} path={} bucket={}",
            id,
            request.request_id,
            folder.folder_path,
            bucket
        );
        self.inner
            .events
            .emit(UploadEvent::UploadScheduled(UploadScheduled { id: id.to_string() }));

        let request_id = request.request_id;
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if self.inner.queue.send(request).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            self.inner.completions().remove(&request_id);
            return Err(UploadError::Cancelled);
        }

        Ok(OutcomeHandle {
            id: id.to_string(),
            receiver,
        })
    }

    /// Jobs currently executing
    pub fn active_jobs(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a free worker
    pub fn pending_jobs(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.active_jobs() + self.pending_jobs() > 0
    }

    /// Stop accepting work, fail queued jobs, and give running jobs up to
    /// `timeout` to observe cancellation before their workers are aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        if !self.inner.cancel.is_cancelled() {
            log::info!(
                "upload_scheduler_shutdown: active={} queued={}",
                self.active_jobs(),
                self.pending_jobs()
            );
        }
        self.inner.cancel.cancel();

        {
            let mut receiver = self.inner.receiver.lock().await;
            receiver.close();
            while let Ok(request) = receiver.try_recv() {
                self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                log::info!("upload_dequeued_on_shutdown: {}", request.id);
                self.inner.complete(
                    request.request_id,
                    UploadOutcome::failed(&request.id, UploadError::Cancelled),
                );
            }
        }

        let mut workers: Vec<JoinHandle<()>> = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };

        if tokio::time::timeout(timeout, join_all(workers.iter_mut()))
            .await
            .is_err()
        {
            let stuck: Vec<JoinHandle<()>> =
                workers.into_iter().filter(|w| !w.is_finished()).collect();
            log::warn!(
                "upload_scheduler_shutdown_timeout: aborting {} workers",
                stuck.len()
            );
            for worker in &stuck {
                worker.abort();
            }
            // Aborted workers drop their running job, releasing its active slot
            join_all(stuck).await;
        }

        // Anything still registered belonged to an aborted job
        let leftovers: Vec<(u64, String)> = self
            .inner
            .completions()
            .iter()
            .map(|(request_id, pending)| (*request_id, pending.request.id.clone()))
            .collect();
        for (request_id, id) in leftovers {
            self.inner
                .complete(request_id, UploadOutcome::failed(&id, UploadError::Cancelled));
        }
    }
}

async fn run_upload_worker(inner: Arc<SchedulerInner>, worker: usize) {
    loop {
        let request = {
            let mut receiver = inner.receiver.lock().await;
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            }
        };

        inner.queued.fetch_sub(1, Ordering::SeqCst);
        let active = ActiveJob::enter(&inner.active);
        log::info!(
            "upload_worker_start: worker={} id={} request={}",
            worker,
            request.id,
            request.request_id
        );

        let outcome = inner.executor.execute(&request, &inner.cancel).await;

        drop(active);
        log::info!(
            "upload_worker_finish: worker={} id={} completed={}",
            worker,
            request.id,
            outcome.is_completed()
        );
        inner.complete(request.request_id, outcome);
    }
    log::debug!("upload_worker_exit: worker={}", worker);
}

/// Wait for `handle` in the background, then log the outcome and report
/// failures to the UI.
pub fn spawn_outcome_listener(
    handle: OutcomeHandle,
    events: Arc<dyn EventSink>,
) -> JoinHandle<UploadOutcome> {
    tokio::spawn(async move {
        let outcome = handle.wait().await;
        match &outcome {
            UploadOutcome::Completed {
                id, files_uploaded, ..
            } => {
                log::info!("Upload finished: {} uploaded {} files", id, files_uploaded);
            }
            UploadOutcome::Failed { id, reason } => {
                log::error!("Upload failed: {} error={}", id, reason);
                events.emit(UploadEvent::UploadFailed(UploadFailed {
                    id: id.clone(),
                    reason: reason.clone(),
                }));
            }
        }
        outcome
    })
}
