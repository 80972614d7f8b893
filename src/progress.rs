//! Byte counts to throttled `progress-update` events

use std::sync::Arc;
use std::time::Instant;

use crate::config::ProgressMode;
use crate::events::{EventSink, ProgressUpdate, UploadEvent};

/// Per-job progress cursor. Owned by the job that created it.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_bytes_for_current_file: u64,
    pub bytes_transferred: u64,
    /// 1-based, 0 before the first file starts
    pub file_index: usize,
    pub file_count: usize,
    pub start_time: Instant,
    /// `None` until the first event for the current file
    pub last_emitted_fraction: Option<f64>,
}

impl ProgressState {
    fn fraction(&self) -> f64 {
        if self.total_bytes_for_current_file == 0 {
            return 1.0;
        }
        let fraction = self.bytes_transferred as f64 / self.total_bytes_for_current_file as f64;
        fraction.min(1.0)
    }
}

pub struct ProgressTracker {
    id: String,
    mode: ProgressMode,
    threshold: f64,
    state: ProgressState,
    events: Arc<dyn EventSink>,
}

impl ProgressTracker {
    pub fn new(
        id: &str,
        file_count: usize,
        mode: ProgressMode,
        threshold: f64,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id: id.to_string(),
            mode,
            threshold,
            state: ProgressState {
                total_bytes_for_current_file: 0,
                bytes_transferred: 0,
                file_index: 0,
                file_count,
                start_time: Instant::now(),
                last_emitted_fraction: None,
            },
            events,
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.state.start_time.elapsed().as_secs_f64()
    }

    /// Reset the cursor for file `index` (1-based) and emit its start event.
    ///
    /// Empty files report 1.0 straight away.
    pub fn begin_file(&mut self, index: usize, total_bytes: u64) {
        self.state.file_index = index;
        self.state.total_bytes_for_current_file = total_bytes;
        self.state.bytes_transferred = 0;
        self.state.last_emitted_fraction = None;
        let fraction = self.state.fraction();
        self.publish(fraction);
    }

    /// Account for `n` more bytes read from the current file
    pub fn record(&mut self, n: u64) {
        self.state.bytes_transferred = self.state.bytes_transferred.saturating_add(n);
        let fraction = self.state.fraction();
        let last = self.state.last_emitted_fraction.unwrap_or(0.0);
        if fraction < last {
            return;
        }

        let due = match self.mode {
            ProgressMode::EveryChunk => true,
            ProgressMode::Throttled => fraction - last > self.threshold,
        };
        if due {
            self.publish(fraction);
        }
    }

    /// Emit 1.0 for the current file unless it already went out
    pub fn finish_file(&mut self) {
        if self.state.last_emitted_fraction != Some(1.0) {
            self.publish(1.0);
        }
    }

    fn publish(&mut self, fraction: f64) {
        self.state.last_emitted_fraction = Some(fraction);

        let overall_fraction = if self.state.file_count == 0 {
            1.0
        } else {
            let done = self.state.file_index.saturating_sub(1) as f64 + fraction;
            (done / self.state.file_count as f64).min(1.0)
        };

        log::debug!(
            "progress: {} file={}/{} fraction={:.3}",
            self.id,
            self.state.file_index,
            self.state.file_count,
            fraction
        );

        self.events.emit(UploadEvent::ProgressUpdate(ProgressUpdate {
            id: self.id.clone(),
            fraction,
            current_file: self.state.file_index,
            file_count: self.state.file_count,
            elapsed_seconds: self.elapsed_seconds(),
            overall_fraction,
        }));
    }
}
