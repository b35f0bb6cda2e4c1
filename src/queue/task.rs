//! Download task and part state

use crate::queue::events::{DataType, DownloadResponse};
use crate::utils::error::{DownloadError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Task status, as stored and as sent to clients.
///
/// `Downloading` is the only live state; the next five are terminal. The
/// remaining variants only ever appear in per-part notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Downloading,
    AllSuccess,
    PartFailed,
    DownloadFailed,
    MuxFailed,
    Canceled,
    DownloadSuccess,
    CaptionsSuccess,
    CaptionsFailed,
    Muxing,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Downloading => "downloading",
            TaskStatus::AllSuccess => "allSuccess",
            TaskStatus::PartFailed => "partFailed",
            TaskStatus::DownloadFailed => "downloadFailed",
            TaskStatus::MuxFailed => "muxFailed",
            TaskStatus::Canceled => "canceled",
            TaskStatus::DownloadSuccess => "downloadSuccess",
            TaskStatus::CaptionsSuccess => "captionsSuccess",
            TaskStatus::CaptionsFailed => "captionsFailed",
            TaskStatus::Muxing => "muxing",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::AllSuccess
                | TaskStatus::PartFailed
                | TaskStatus::DownloadFailed
                | TaskStatus::MuxFailed
                | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let all = [
            TaskStatus::Downloading,
            TaskStatus::AllSuccess,
            TaskStatus::PartFailed,
            TaskStatus::DownloadFailed,
            TaskStatus::MuxFailed,
            TaskStatus::Canceled,
            TaskStatus::DownloadSuccess,
            TaskStatus::CaptionsSuccess,
            TaskStatus::CaptionsFailed,
            TaskStatus::Muxing,
        ];
        all.into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

/// Lifecycle of one part
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartState {
    InProgress,
    Success,
    Failed(String),
}

/// Where a part came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub source: String,
    pub site: String,
    pub title: String,
}

/// One physical output file of a task
#[derive(Debug, Clone)]
pub struct Part {
    pub id: String,
    /// Stream or caption id the client asked for
    pub request_code: String,
    pub source_dir: PathBuf,
    pub file_name: PathBuf,
    pub url: String,
    pub ext: String,
    pub page: PageInfo,
    pub size: u64,
    pub quality: String,
    pub need_mux: bool,
    pub current: u64,
    pub state: PartState,
}

impl Part {
    pub fn is_finished(&self) -> bool {
        self.state != PartState::InProgress
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            PartState::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    fn set_finished(&mut self, err: Option<String>) {
        self.state = match err {
            Some(msg) => PartState::Failed(msg),
            None => PartState::Success,
        };
    }
}

/// Bytes/s as `"x.xx MB/s"`, or `"x.xx KB/s"` below one MB/s
pub fn format_speed(bytes_per_sec: f64) -> String {
    let mb = bytes_per_sec / 1024.0 / 1024.0;
    if mb >= 1.0 {
        format!("{:.2} MB/s", mb)
    } else {
        format!("{:.2} KB/s", mb * 1024.0)
    }
}

/// Live state of one download request
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub status: TaskStatus,
    /// Output path -> stream part
    pub streams: BTreeMap<PathBuf, Part>,
    /// Output path -> caption part
    pub captions: BTreeMap<PathBuf, Part>,
    pub total: u64,
    pub finished: u64,
    pub size: u64,
    pub current: u64,
    pub speed: String,
    pub speed_bps: f64,
    pub progress: f64,
    pub error: Option<String>,
    pub cancel: CancellationToken,
    last_sample: Option<(Instant, u64)>,
}

impl DownloadTask {
    pub fn new(
        id: impl Into<String>,
        streams: BTreeMap<PathBuf, Part>,
        captions: BTreeMap<PathBuf, Part>,
        cancel: CancellationToken,
    ) -> Self {
        let total = (streams.len() + captions.len()) as u64;
        let size = streams.values().map(|p| p.size).sum();
        Self {
            id: id.into(),
            status: TaskStatus::Downloading,
            streams,
            captions,
            total,
            finished: 0,
            size,
            current: 0,
            speed: String::new(),
            speed_bps: 0.0,
            progress: 0.0,
            error: None,
            cancel,
            last_sample: None,
        }
    }

    /// Raise one stream part's byte count and recompute the aggregate.
    ///
    /// Fails with `StaleProgressTarget` when no stream part has that file name,
    /// the part already finished, or the task left `Downloading`.
    pub fn set_stream_current(&mut self, file_name: &Path, current: u64) -> Result<()> {
        let live = self.status == TaskStatus::Downloading;
        let Some(part) = self.streams.get_mut(file_name).filter(|p| live && !p.is_finished()) else {
            return Err(DownloadError::StaleProgressTarget {
                id: self.id.clone(),
                file_name: file_name.display().to_string(),
            });
        };
        // Samples can arrive out of order; never go backwards
        part.current = part.current.max(current);

        let aggregate = self.streams.values().map(|p| p.current).sum();
        self.update_speed(aggregate);
        Ok(())
    }

    /// Record a new aggregate sample and derive speed and progress
    pub fn update_speed(&mut self, current: u64) {
        let now = Instant::now();
        if let Some((last_time, last_current)) = self.last_sample {
            let elapsed = now.duration_since(last_time).as_secs_f64();
            if elapsed > 0.0 {
                self.speed_bps = current.saturating_sub(last_current) as f64 / elapsed;
                self.speed = format_speed(self.speed_bps);
            }
        }
        self.last_sample = Some((now, current));
        self.current = current;

        self.progress = if self.total > 0 && self.size > 0 {
            (self.current as f64 / self.size as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
    }

    /// Mark a part terminal; streams are searched before captions.
    ///
    /// Returns the part's data type, or None when the file is unknown or the
    /// part already finished.
    pub fn finish_part(&mut self, file_name: &Path, err: Option<String>) -> Option<DataType> {
        let (part, data_type) = if let Some(part) = self.streams.get_mut(file_name) {
            (part, DataType::Video)
        } else if let Some(part) = self.captions.get_mut(file_name) {
            (part, DataType::Caption)
        } else {
            return None;
        };

        if part.is_finished() {
            return None;
        }

        if self.error.is_none() {
            self.error.clone_from(&err);
        }
        part.set_finished(err);
        self.finished = (self.finished + 1).min(self.total);
        Some(data_type)
    }

    /// Any caption part ended in failure
    pub fn caption_failed(&self) -> bool {
        self.captions.values().any(|p| p.error().is_some())
    }

    pub fn find_part(&self, file_name: &Path) -> Option<&Part> {
        self.streams
            .get(file_name)
            .or_else(|| self.captions.get(file_name))
    }

    /// Client view of the task under `status`
    pub fn response(&self, status: TaskStatus, data_type: DataType) -> DownloadResponse {
        DownloadResponse {
            id: self.id.clone(),
            status,
            total: self.total,
            finished: self.finished,
            speed: self.speed.clone(),
            data_type,
            progress: self.progress,
            error: self.error.clone().unwrap_or_default(),
        }
    }
}
