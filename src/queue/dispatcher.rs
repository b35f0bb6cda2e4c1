//! Dispatcher loop: delivers notifications, applies progress, persists finished tasks

use crate::database::TaskOutcome;
use crate::downloader::ProgressReport;
use crate::queue::events::{DataType, DownloadResponse};
use crate::queue::manager::WorkQueue;
use crate::queue::task::DownloadTask;
use crate::utils::error::{DownloadError, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long shutdown waits for canceled tasks to finalize
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Receiving halves owned by the dispatcher once started
pub(crate) struct DispatchChannels {
    pub(crate) notify_rx: mpsc::UnboundedReceiver<DownloadResponse>,
    pub(crate) completed_rx: mpsc::UnboundedReceiver<DownloadTask>,
    pub(crate) progress_rx: mpsc::Receiver<ProgressReport>,
}

impl WorkQueue {
    /// Spawn the dispatcher. After [`WorkQueue::shutdown`] it keeps running
    /// until every in-flight task has been persisted and reported.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let channels = self
            .inner
            .channels
            .lock()
            .await
            .take()
            .ok_or(DownloadError::DispatcherStarted)?;

        let queue = self.clone();
        Ok(tokio::spawn(async move { queue.dispatch(channels).await }))
    }

    async fn dispatch(self, mut channels: DispatchChannels) {
        info!("Dispatcher started");
        let mut finishing = JoinSet::new();
        let mut draining = false;
        let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
        tokio::pin!(drain_deadline);

        loop {
            tokio::select! {
                _ = self.inner.root.cancelled(), if !draining => {
                    info!("Dispatcher draining in-flight tasks");
                    draining = true;
                    drain_deadline.as_mut().reset(Instant::now() + DRAIN_TIMEOUT);
                }
                Some(response) = channels.notify_rx.recv() => {
                    self.inner.notifier.notify(&response).await;
                }
                Some(task) = channels.completed_rx.recv() => {
                    let queue = self.clone();
                    finishing.spawn(async move { queue.process_finished(task).await });
                }
                Some(report) = channels.progress_rx.recv() => {
                    self.process_progress(report).await;
                }
                Some(joined) = finishing.join_next(), if !finishing.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Finalizing a task panicked: {}", e);
                    }
                }
                _ = &mut drain_deadline, if draining => {
                    warn!("Dispatcher gave up waiting for in-flight tasks");
                    break;
                }
                else => break,
            }

            if draining && self.drained(&channels, &finishing).await {
                break;
            }
        }
        info!("Dispatcher stopped");
    }

    /// Nothing left to finalize or deliver
    async fn drained(&self, channels: &DispatchChannels, finishing: &JoinSet<()>) -> bool {
        finishing.is_empty()
            && channels.completed_rx.is_empty()
            && channels.notify_rx.is_empty()
            && self.inner.downloading.lock().await.is_empty()
    }

    /// Persist a finished task, then always tell the client about it
    pub(crate) async fn process_finished(&self, task: DownloadTask) {
        let outcome = TaskOutcome {
            id: task.id.clone(),
            status: task.status.to_string(),
            total: task.total as i64,
            finished: task.finished as i64,
            size: task.size as i64,
            current: task.current as i64,
            progress: task.progress,
            error: task.error.clone().unwrap_or_default(),
        };

        match self.inner.store.finish(&outcome).await {
            Ok(true) => debug!("Persisted task {} as {}", task.id, task.status),
            Ok(false) => warn!("No live record for finished task {}", task.id),
            Err(e) => warn!("Persisting task {} failed: {}", task.id, e),
        }

        self.emit(task.response(task.status, DataType::All));
    }

    pub(crate) async fn process_progress(&self, report: ProgressReport) {
        match report.data_type {
            DataType::Video => {
                self.set_stream_current(&report.id, &report.file_name, report.current)
                    .await
            }
            other => debug!("Ignoring {:?} progress for {}", other, report.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DownloadRecord, DownloadStore};
    use crate::queue::events::ChannelNotifier;
    use crate::queue::manager::DownloadRequest;
    use crate::queue::task::TaskStatus;
    use crate::queue::test_support::{media_with_stream, queue_with_media, NoopMuxer, StaticExtractor};
    use crate::utils::config::AppSettings;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct BrokenStore;

    #[async_trait]
    impl DownloadStore for BrokenStore {
        async fn begin(&self, _record: &DownloadRecord) -> Result<()> {
            Err(DownloadError::Canceled)
        }
        async fn get(&self, _id: &str) -> Result<Option<DownloadRecord>> {
            Err(DownloadError::Canceled)
        }
        async fn get_with_deleted(&self, _id: &str) -> Result<Option<DownloadRecord>> {
            Err(DownloadError::Canceled)
        }
        async fn finish(&self, _outcome: &TaskOutcome) -> Result<bool> {
            Err(DownloadError::Canceled)
        }
        async fn delete(&self, _id: &str) -> Result<bool> {
            Err(DownloadError::Canceled)
        }
        async fn list(&self, _limit: i64) -> Result<Vec<DownloadRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (queue, _id, _dir) = queue_with_media(media_with_stream(&[10], false)).await;
        let handle = queue.start().await.unwrap();
        assert!(matches!(queue.start().await, Err(DownloadError::DispatcherStarted)));

        queue.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_task() {
        let (queue, id, _dir) = queue_with_media(media_with_stream(&[10], false)).await;
        let plan = queue
            .parse_to_task(&DownloadRequest {
                id: id.clone(),
                stream: "hd".to_string(),
                caption: String::new(),
            })
            .await
            .unwrap();
        let handle = queue.start().await.unwrap();

        queue.shutdown();
        assert!(plan.cancel.is_cancelled());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished(), "dispatcher must outlive the task");

        assert!(queue.set_finished(&id, TaskStatus::Canceled, None).await);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_finished_task_notified_even_when_store_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = AppSettings {
            download_location: dir.path().to_path_buf(),
            ..Default::default()
        };
        let (notifier, mut rx) = ChannelNotifier::new();
        let queue = WorkQueue::new(
            settings,
            Arc::new(BrokenStore),
            Arc::new(notifier),
            Arc::new(NoopMuxer),
            Arc::new(StaticExtractor(Vec::new())),
        )
        .unwrap();
        let handle = queue.start().await.unwrap();

        let mut task = DownloadTask::new("gone", BTreeMap::new(), BTreeMap::new(), CancellationToken::new());
        task.status = TaskStatus::DownloadFailed;
        task.error = Some("boom".to_string());
        queue.process_finished(task).await;

        let response = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status, TaskStatus::DownloadFailed);
        assert_eq!(response.data_type, DataType::All);
        assert_eq!(response.error, "boom");

        queue.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_reports_update_task() {
        let (queue, id, _dir) = queue_with_media(media_with_stream(&[100], false)).await;
        let plan = queue
            .parse_to_task(&DownloadRequest {
                id: id.clone(),
                stream: "hd".to_string(),
                caption: String::new(),
            })
            .await
            .unwrap();
        let file_name = plan.streams[0].file_name.to_string_lossy().to_string();

        queue
            .process_progress(ProgressReport {
                id: id.clone(),
                file_name: file_name.clone(),
                current: 40,
                data_type: DataType::Video,
            })
            .await;
        queue
            .process_progress(ProgressReport {
                id: id.clone(),
                file_name,
                current: 90,
                data_type: DataType::Caption,
            })
            .await;

        let task = queue.task_snapshot(&id).await.unwrap();
        assert_eq!(task.current, 40);
        assert_eq!(task.progress, 40.0);
    }
}
