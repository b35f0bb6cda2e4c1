//! Download work queue: task registry and state transitions
//!
//! One [`WorkQueue`] owns every in-flight [`DownloadTask`]. All task and part
//! mutation goes through the transition methods below, serialized by a single
//! mutex; notifications for a transition are enqueued while that mutex is held
//! so clients observe transitions in the order they happened.

use crate::database::{DownloadRecord, DownloadStore, DEFAULT_LIST_LIMIT};
use crate::downloader::{DownloadConfig, DownloadEngine, Muxer, ProgressReport};
use crate::extractor::{CaptionTransform, Extractor, MediaInfo};
use crate::queue::cache::ExtractorCache;
use crate::queue::dispatcher::DispatchChannels;
use crate::queue::events::{DataType, DownloadResponse, Notifier};
use crate::queue::task::{DownloadTask, PageInfo, Part, PartState, TaskStatus};
use crate::utils::config::AppSettings;
use crate::utils::error::{DownloadError, Result};
use crate::utils::organizer::FileOrganizer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default caption extension when the extractor reports none
const DEFAULT_CAPTION_EXT: &str = "srt";

/// Client request: one cached media id plus the stream and caption to fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub caption: String,
}

/// Everything needed to run a registered task
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub id: String,
    pub media: MediaInfo,
    /// Stream parts in playback order
    pub streams: Vec<Part>,
    pub captions: Vec<Part>,
    pub cancel: CancellationToken,
}

impl TaskPlan {
    pub fn caption_transform(&self) -> Option<CaptionTransform> {
        self.media.caption_transform
    }
}

pub(crate) struct Inner {
    pub(crate) settings: AppSettings,
    pub(crate) engine: DownloadEngine,
    pub(crate) organizer: FileOrganizer,
    pub(crate) cache: ExtractorCache,
    pub(crate) downloading: Mutex<HashMap<String, DownloadTask>>,
    pub(crate) store: Arc<dyn DownloadStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) muxer: Arc<dyn Muxer>,
    pub(crate) extractor: Arc<dyn Extractor>,
    pub(crate) notify_tx: mpsc::UnboundedSender<DownloadResponse>,
    pub(crate) completed_tx: mpsc::UnboundedSender<DownloadTask>,
    pub(crate) progress_tx: mpsc::Sender<ProgressReport>,
    pub(crate) channels: Mutex<Option<DispatchChannels>>,
    pub(crate) root: CancellationToken,
}

/// Download work queue
#[derive(Clone)]
pub struct WorkQueue {
    pub(crate) inner: Arc<Inner>,
}

impl WorkQueue {
    /// Create a work queue; call [`WorkQueue::start`] before downloading
    pub fn new(
        settings: AppSettings,
        store: Arc<dyn DownloadStore>,
        notifier: Arc<dyn Notifier>,
        muxer: Arc<dyn Muxer>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self> {
        let settings = settings.normalized();
        let engine = DownloadEngine::new(DownloadConfig::from(&settings))?;
        let organizer = FileOrganizer::new(settings.download_location.clone());
        let cache = ExtractorCache::new(settings.cache_capacity);

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::channel(settings.progress_buffer);

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                engine,
                organizer,
                cache,
                downloading: Mutex::new(HashMap::new()),
                store,
                notifier,
                muxer,
                extractor,
                notify_tx,
                completed_tx,
                progress_tx,
                channels: Mutex::new(Some(DispatchChannels {
                    notify_rx,
                    completed_rx,
                    progress_rx,
                })),
                root: CancellationToken::new(),
            }),
        })
    }

    pub fn settings(&self) -> &AppSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &ExtractorCache {
        &self.inner.cache
    }

    /// Cancel every running task; the dispatcher stops once they have all
    /// been finalized and persisted. New tasks are rejected from here on.
    pub fn shutdown(&self) {
        info!("Shutting down work queue");
        self.inner.root.cancel();
    }

    /// Extract `url` and cache every result under a fresh id
    pub async fn get(&self, url: &str) -> Result<Vec<MediaInfo>> {
        if url.trim().is_empty() {
            return Err(DownloadError::Extraction("url is empty".to_string()));
        }

        let extracted = self
            .inner
            .extractor
            .extract(url)
            .await
            .map_err(|e| DownloadError::Extraction(format!("{:#}", e)))?;

        let mut cached = Vec::with_capacity(extracted.len());
        for media in extracted {
            cached.push(self.inner.cache.cache(media).await);
        }
        debug!("Cached {} media entries for {}", cached.len(), url);
        Ok(cached)
    }

    /// Version string of the configured muxer
    pub async fn ffmpeg_version(&self) -> Result<String> {
        self.inner.muxer.version().await
    }

    /// Latest persisted downloads
    pub async fn list_downloaded(&self) -> Result<Vec<DownloadRecord>> {
        let limit = if self.inner.settings.list_limit > 0 {
            self.inner.settings.list_limit
        } else {
            DEFAULT_LIST_LIMIT
        };
        self.inner.store.list(limit).await
    }

    pub async fn is_downloading(&self, id: &str) -> bool {
        self.inner.downloading.lock().await.contains_key(id)
    }

    /// Copy of a live task's state
    pub async fn task_snapshot(&self, id: &str) -> Option<DownloadTask> {
        self.inner.downloading.lock().await.get(id).cloned()
    }

    /// Cancel a running task; false if it is not in flight
    pub async fn cancel_task(&self, id: &str) -> bool {
        match self.inner.downloading.lock().await.get(id) {
            Some(task) => {
                info!("Canceling task {}", id);
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Decide which id a client should download `id` under.
    ///
    /// Rejects a stream or caption already in flight. An id with no stored
    /// record is reused; otherwise the cached media is re-cached under a new
    /// id so the fresh download does not collide with the old record.
    pub async fn check_task(&self, id: &str, stream_id: &str, caption_id: &str) -> Result<String> {
        {
            let downloading = self.inner.downloading.lock().await;
            if let Some(task) = downloading.get(id) {
                if !stream_id.is_empty()
                    && task.streams.values().any(|p| p.request_code == stream_id)
                {
                    return Err(DownloadError::AlreadyDownloading {
                        kind: "stream",
                        code: stream_id.to_string(),
                    });
                }
                if !caption_id.is_empty()
                    && task.captions.values().any(|p| p.request_code == caption_id)
                {
                    return Err(DownloadError::AlreadyDownloading {
                        kind: "caption",
                        code: caption_id.to_string(),
                    });
                }
            }
        }

        match self.inner.store.get(id).await {
            Ok(None) => return Ok(id.to_string()),
            Ok(Some(_)) => {}
            Err(e) => warn!("check_task: reading record {} failed: {}", id, e),
        }

        match self.inner.cache.get(id).await {
            Some(media) => {
                let fresh = self.inner.cache.cache(media).await;
                debug!("Re-cached {} as {}", id, fresh.id);
                Ok(fresh.id)
            }
            None => Err(DownloadError::CacheMiss(id.to_string())),
        }
    }

    /// Register the task and run it in the background
    pub async fn download(&self, req: DownloadRequest) -> Result<JoinHandle<()>> {
        let plan = self.parse_to_task(&req).await?;
        let queue = self.clone();
        Ok(tokio::spawn(async move { queue.run_plan(plan).await }))
    }

    /// Register the task and run it to completion
    pub async fn run_download(&self, req: DownloadRequest) -> Result<()> {
        let plan = self.parse_to_task(&req).await?;
        self.run_plan(plan).await;
        Ok(())
    }

    /// Build a task from cached media and register it.
    ///
    /// One part per requested caption and per stream sub-part; the initial
    /// record is persisted and a `downloading` notification emitted.
    pub async fn parse_to_task(&self, req: &DownloadRequest) -> Result<TaskPlan> {
        if self.inner.root.is_cancelled() {
            return Err(DownloadError::Canceled);
        }

        let media = self
            .inner
            .cache
            .get(&req.id)
            .await
            .ok_or_else(|| DownloadError::CacheMiss(req.id.clone()))?;

        let organizer = &self.inner.organizer;
        let source_dir = organizer.source_dir(&media.source).await?;
        let page = PageInfo {
            source: media.source.clone(),
            site: media.site.clone(),
            title: media.title.clone(),
        };
        let new_part = |request_code: &str, file_name: PathBuf, url: &str, ext: &str| Part {
            id: req.id.clone(),
            request_code: request_code.to_string(),
            source_dir: source_dir.clone(),
            file_name,
            url: url.to_string(),
            ext: ext.to_string(),
            page: page.clone(),
            size: 0,
            quality: String::new(),
            need_mux: false,
            current: 0,
            state: PartState::InProgress,
        };

        let mut captions = Vec::new();
        match media.captions.get(&req.caption).filter(|_| !req.caption.is_empty()) {
            Some(caption) => {
                let ext = if caption.ext.is_empty() {
                    DEFAULT_CAPTION_EXT
                } else {
                    caption.ext.as_str()
                };
                match organizer
                    .caption_file_path(&media.source, &media.title, ext, &caption.language_code)
                    .await
                {
                    Ok(path) => captions.push(new_part(&req.caption, path, &caption.url, ext)),
                    Err(e) => info!("caption file path error: {}", e),
                }
            }
            None => debug!("caption {:?} not requested or not found", req.caption),
        }

        let mut streams = Vec::new();
        let (mut quality, mut format) = (String::new(), String::new());
        match media.streams.get(&req.stream).filter(|_| !req.stream.is_empty()) {
            Some(stream) => {
                let count = stream.parts.len();
                for (idx, sub) in stream.parts.iter().enumerate() {
                    let title = if count == 1 {
                        media.title.clone()
                    } else {
                        format!("{}[{}]", media.title, idx)
                    };
                    match organizer.output_file(&media.source, &title, &sub.ext, &[]).await {
                        Ok(path) => {
                            let mut part = new_part(&req.stream, path, &sub.url, &sub.ext);
                            part.size = sub.size;
                            part.quality = stream.quality.clone();
                            part.need_mux = stream.need_mux;
                            streams.push(part);
                        }
                        Err(e) => info!("stream part file path error: {}", e),
                    }
                    if format.is_empty() {
                        format = sub.ext.clone();
                    }
                }
                quality = stream.quality.clone();
            }
            None => debug!("stream {:?} not requested or not found", req.stream),
        }

        if streams.is_empty() && captions.is_empty() {
            return Err(DownloadError::NothingToDownload(req.id.clone()));
        }

        let cancel = self.inner.root.child_token();
        let task = DownloadTask::new(
            req.id.clone(),
            streams.iter().map(|p| (p.file_name.clone(), p.clone())).collect::<BTreeMap<_, _>>(),
            captions.iter().map(|p| (p.file_name.clone(), p.clone())).collect::<BTreeMap<_, _>>(),
            cancel.clone(),
        );
        let (total, size) = (task.total, task.size);

        {
            let mut downloading = self.inner.downloading.lock().await;
            if downloading.contains_key(&req.id) {
                return Err(DownloadError::AlreadyDownloading {
                    kind: "task",
                    code: req.id.clone(),
                });
            }
            downloading.insert(req.id.clone(), task);
        }

        let now = Utc::now();
        let record = DownloadRecord {
            id: req.id.clone(),
            status: TaskStatus::Downloading.to_string(),
            source: media.source.clone(),
            site: media.site.clone(),
            url: media.url.clone(),
            title: media.title.clone(),
            quality,
            format,
            total: total as i64,
            finished: 0,
            size: size as i64,
            current: 0,
            progress: 0.0,
            saved_path: source_dir.display().to_string(),
            error: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        if let Err(e) = self.inner.store.begin(&record).await {
            warn!("create download record {} failed: {}", req.id, e);
        }

        let mut response = DownloadResponse::new(&req.id, TaskStatus::Downloading, DataType::All);
        response.total = total;
        self.emit(response);

        info!(
            "Registered task {} ({} stream parts, {} captions, {} bytes)",
            req.id,
            streams.len(),
            captions.len(),
            size
        );

        Ok(TaskPlan {
            id: req.id.clone(),
            media,
            streams,
            captions,
            cancel,
        })
    }

    /// Update one stream part's byte count; unknown or finished targets are a logged no-op
    pub async fn set_stream_current(&self, id: &str, file_name: &str, current: u64) {
        let mut downloading = self.inner.downloading.lock().await;
        let Some(task) = downloading.get_mut(id) else {
            debug!("set_stream_current: task {} not found", id);
            return;
        };

        if let Err(stale) = task.set_stream_current(Path::new(file_name), current) {
            debug!("set_stream_current: {}", stale);
            return;
        }

        self.emit(task.response(TaskStatus::Downloading, DataType::Video));
    }

    /// Mark one part terminal and notify; repeated or unknown calls are a logged no-op
    pub async fn set_part_finished(&self, id: &str, file_name: &Path, err: Option<&DownloadError>) {
        let mut downloading = self.inner.downloading.lock().await;
        let Some(task) = downloading.get_mut(id) else {
            info!("set_part_finished: task {} not found", id);
            return;
        };

        let failed = err.is_some();
        let status = match task.finish_part(file_name, err.map(|e| e.to_string())) {
            Some(DataType::Caption) if failed => (TaskStatus::CaptionsFailed, DataType::Caption),
            Some(DataType::Caption) => (TaskStatus::CaptionsSuccess, DataType::Caption),
            Some(_) if failed => (TaskStatus::DownloadFailed, DataType::Video),
            Some(_) => (TaskStatus::DownloadSuccess, DataType::Video),
            None => {
                if task.find_part(file_name).is_some() {
                    info!(
                        "set_part_finished: {} of task {} already finished",
                        file_name.display(),
                        id
                    );
                } else {
                    info!(
                        "set_part_finished: task {} found, {} not found",
                        id,
                        file_name.display()
                    );
                }
                return;
            }
        };

        self.emit(task.response(status.0, status.1));
    }

    /// Force progress to 100 before finalizing; returns (total, finished)
    pub async fn fix_download_success(&self, id: &str) -> Option<(u64, u64)> {
        let mut downloading = self.inner.downloading.lock().await;
        let Some(task) = downloading.get_mut(id) else {
            info!("fix_download_success: task {} not found", id);
            return None;
        };

        task.status = TaskStatus::DownloadSuccess;
        task.progress = 100.0;
        Some((task.total, task.finished))
    }

    /// Stamp the terminal status, hand the task to persistence, and forget it
    pub async fn set_finished(&self, id: &str, status: TaskStatus, err: Option<&DownloadError>) -> bool {
        let mut downloading = self.inner.downloading.lock().await;
        let Some(mut task) = downloading.remove(id) else {
            info!("set_finished: task {} not found", id);
            return false;
        };

        if let Some(e) = err {
            task.error = Some(e.to_string());
        }
        task.status = status;

        if self.inner.completed_tx.send(task).is_err() {
            warn!("set_finished: completed channel closed, {} not persisted", id);
        }
        info!("Task {} finished with status {}", id, status);
        true
    }

    pub(crate) fn emit(&self, response: DownloadResponse) {
        if self.inner.notify_tx.send(response).is_err() {
            debug!("Notification channel closed");
        }
    }
}
