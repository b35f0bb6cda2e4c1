//! Progress tracking for part downloads

use crate::queue::events::DataType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Marker for "no report sent yet"
const NEVER: u64 = u64::MAX;

/// Byte count of one part, as seen by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub id: String,
    pub file_name: String,
    pub current: u64,
    pub data_type: DataType,
}

/// Shared byte counter for every chunk of one part.
///
/// Chunk readers call [`ProgressTracker::add`] concurrently; at most one
/// report per `interval` leaves the tracker regardless of chunk count.
#[derive(Debug)]
pub struct ProgressTracker {
    id: String,
    file_name: String,
    total_size: u64,
    downloaded: AtomicU64,
    started: Instant,
    last_report_ms: AtomicU64,
    interval: Duration,
    report: mpsc::Sender<ProgressReport>,
}

impl ProgressTracker {
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        total_size: u64,
        interval: Duration,
        report: mpsc::Sender<ProgressReport>,
    ) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            total_size,
            downloaded: AtomicU64::new(0),
            started: Instant::now(),
            last_report_ms: AtomicU64::new(NEVER),
            interval,
            report,
        }
    }

    /// Add `n` freshly read bytes; returns the part's aggregate count
    pub fn add(&self, n: u64) -> u64 {
        let downloaded = self.downloaded.fetch_add(n, Ordering::AcqRel) + n;

        let now_ms = self.started.elapsed().as_millis() as u64;
        let last = self.last_report_ms.load(Ordering::Acquire);
        let due = last == NEVER || now_ms.saturating_sub(last) >= self.interval.as_millis() as u64;

        // Only the caller that wins the swap emits for this interval
        if due
            && self
                .last_report_ms
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.emit(downloaded);
        }

        downloaded
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    fn emit(&self, current: u64) {
        let report = ProgressReport {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            current,
            data_type: DataType::Video,
        };
        match self.report.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("Progress channel full, dropping sample for {}", self.file_name)
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Progress channel closed for {}", self.file_name)
            }
        }
    }
}
