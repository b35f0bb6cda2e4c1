//! Runs a registered task: captions, stream parts, optional mux, finalization

use crate::downloader::PartRequest;
use crate::queue::events::{DataType, DownloadResponse};
use crate::queue::manager::{TaskPlan, WorkQueue};
use crate::queue::task::{Part, TaskStatus};
use crate::utils::error::{DownloadError, Result};
use futures::future::join_all;
use std::path::PathBuf;
use tracing::{debug, info, warn};

impl WorkQueue {
    /// Drive a registered task to a terminal status
    pub(crate) async fn run_plan(&self, plan: TaskPlan) {
        if !plan.captions.is_empty() {
            self.process_captions(&plan).await;
        }

        if plan.streams.is_empty() && !plan.captions.is_empty() {
            self.finish_captions_only(&plan).await;
        } else {
            self.process_streams(&plan).await;
        }
    }

    /// Fetch every caption part; failures are recorded on the part only
    pub(crate) async fn process_captions(&self, plan: &TaskPlan) {
        for part in &plan.captions {
            let result = self
                .inner
                .engine
                .fetch_caption(&part.url, &part.file_name, plan.caption_transform(), &plan.cancel)
                .await;

            if let Err(e) = &result {
                warn!("Caption {} of task {} failed: {}", part.request_code, plan.id, e);
            }
            self.set_part_finished(&plan.id, &part.file_name, result.as_ref().err())
                .await;
        }
    }

    async fn finish_captions_only(&self, plan: &TaskPlan) {
        let status = if !self.caption_failed(&plan.id).await {
            TaskStatus::AllSuccess
        } else if plan.cancel.is_cancelled() {
            TaskStatus::Canceled
        } else {
            TaskStatus::PartFailed
        };
        self.set_finished(&plan.id, status, None).await;
    }

    /// Download every stream part, then mux when the stream asks for it.
    ///
    /// Parts run concurrently and all of them finish before the outcome is
    /// decided, so one failing part never cancels its siblings.
    pub(crate) async fn process_streams(&self, plan: &TaskPlan) {
        let id = plan.id.as_str();
        let parts = &plan.streams;

        if parts.is_empty() {
            self.set_finished(id, TaskStatus::DownloadFailed, Some(&DownloadError::NoParts))
                .await;
            return;
        }

        let outcome = if parts.len() == 1 {
            self.download_stream_part(plan, &parts[0]).await.map(|_| ())
        } else {
            let results = join_all(parts.iter().map(|part| self.download_stream_part(plan, part))).await;
            let errors: Vec<String> = results
                .into_iter()
                .filter_map(|r| r.err())
                .map(|e| e.to_string())
                .collect();
            if errors.is_empty() {
                Ok(())
            } else {
                Err(DownloadError::PartsFailed(errors))
            }
        };

        if let Err(e) = outcome {
            let status = if plan.cancel.is_cancelled() {
                TaskStatus::Canceled
            } else {
                TaskStatus::DownloadFailed
            };
            warn!("Task {} stream download failed: {}", id, e);
            self.set_finished(id, status, Some(&e)).await;
            return;
        }

        let counts = self.fix_download_success(id).await;

        // A lone part is already the finished file
        if parts.len() > 1 && parts[0].need_mux {
            let mut muxing = DownloadResponse::new(id, TaskStatus::Muxing, DataType::Video);
            if let Some((total, finished)) = counts {
                muxing.total = total;
                muxing.finished = finished;
            }
            muxing.progress = 100.0;
            self.emit(muxing);

            if let Err(e) = self.mux_parts(plan).await {
                warn!("Task {} mux failed: {}", id, e);
                self.set_finished(id, TaskStatus::MuxFailed, Some(&e)).await;
                return;
            }
        }

        let status = if self.caption_failed(id).await {
            TaskStatus::PartFailed
        } else {
            TaskStatus::AllSuccess
        };
        self.set_finished(id, status, None).await;
    }

    async fn download_stream_part(&self, plan: &TaskPlan, part: &Part) -> Result<PathBuf> {
        let request = PartRequest {
            id: plan.id.clone(),
            file_name: part.file_name.clone(),
            url: part.url.clone(),
            size: part.size,
        };

        let result = self
            .inner
            .engine
            .download_part(&request, self.inner.progress_tx.clone(), &plan.cancel)
            .await;

        self.set_part_finished(&plan.id, &part.file_name, result.as_ref().err())
            .await;
        result
    }

    async fn mux_parts(&self, plan: &TaskPlan) -> Result<PathBuf> {
        let first = &plan.streams[0];
        let ext = plan
            .media
            .streams
            .get(&first.request_code)
            .map(|s| s.ext.clone())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| first.ext.clone());

        let output = self
            .inner
            .organizer
            .stream_file_path(&first.page.source, &first.page.title, &first.quality, &ext)
            .await?;
        let inputs: Vec<PathBuf> = plan.streams.iter().map(|p| p.file_name.clone()).collect();

        debug!("Muxing {} parts into {}", inputs.len(), output.display());
        self.inner.muxer.mux(&inputs, &output).await?;
        info!("Task {} muxed into {}", plan.id, output.display());
        Ok(output)
    }

    async fn caption_failed(&self, id: &str) -> bool {
        self.inner
            .downloading
            .lock()
            .await
            .get(id)
            .is_some_and(|task| task.caption_failed())
    }
}
