//! Part download engine: chunk workers, ordered pipe, temp file, rename

use crate::downloader::assembler::{assemble, is_assembly_abort, pipe, FirstError};
use crate::downloader::progress::{ProgressReport, ProgressTracker};
use crate::downloader::segment::{
    chunk_slots, download_chunk, plan_chunks, worker_count, Chunk, ChunkSlot, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_WORKERS,
};
use crate::extractor::CaptionTransform;
use crate::utils::config::AppSettings;
use crate::utils::error::{DownloadError, Result};
use crate::utils::organizer::FileOrganizer;
use reqwest::Client;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Download configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub chunk_size: u64,                // Bytes per ranged request (default: 10 MiB)
    pub max_workers: usize,             // Concurrent chunk requests per part (default: 10)
    pub temp_extension: String,         // Suffix of in-progress files (default: "part")
    pub progress_interval: Duration,    // Minimum gap between progress reports
    pub user_agent: String,
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for DownloadConfig {
    fn from(settings: &AppSettings) -> Self {
        Self {
            chunk_size: if settings.chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                settings.chunk_size
            },
            max_workers: if settings.max_chunk_workers == 0 {
                MAX_CHUNK_WORKERS
            } else {
                settings.max_chunk_workers
            },
            temp_extension: settings.temp_extension.clone(),
            progress_interval: settings.progress_interval(),
            user_agent: settings.user_agent.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }
}

/// One physical output file to fetch
#[derive(Debug, Clone)]
pub struct PartRequest {
    pub id: String,
    pub file_name: PathBuf,
    pub url: String,
    pub size: u64,
}

/// State shared by the chunk workers of one part
struct ChunkJob {
    client: Client,
    url: String,
    chunks: Vec<Chunk>,
    slots: Vec<ChunkSlot>,
    next: AtomicUsize,
    tracker: ProgressTracker,
    failure: Arc<FirstError>,
    cancel: CancellationToken,
}

impl ChunkJob {
    async fn run(self: Arc<Self>) {
        while !self.cancel.is_cancelled() {
            let index = self.next.fetch_add(1, Ordering::Relaxed);
            let Some(chunk) = self.chunks.get(index) else {
                break;
            };
            let Some(slot) = self.slots[index].take() else {
                continue;
            };

            match download_chunk(&self.client, &self.url, chunk, &self.tracker, &self.cancel).await {
                Ok(bytes) => {
                    // Receiver is gone once assembly has aborted
                    let _ = slot.send(bytes);
                }
                Err(err) => {
                    if !err.is_canceled() {
                        warn!("Chunk {} of {} failed: {}", index, self.url, err);
                    }
                    // Record before the slot closes so the assembler sees the cause
                    self.failure.record(err);
                    self.cancel.cancel();
                    drop(slot);
                    break;
                }
            }
        }
        // Unclaimed slots close when the last worker drops the job
    }
}

/// Chunked parallel download engine
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    client: Client,
    config: DownloadConfig,
}

impl DownloadEngine {
    /// Create new download engine with configuration
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download one part end to end.
    ///
    /// Bytes land in a temp file next to the final path and are renamed into
    /// place only after every chunk arrived in order. On failure the temp file
    /// is left behind and the first chunk error is returned.
    pub async fn download_part(
        &self,
        request: &PartRequest,
        report: mpsc::Sender<ProgressReport>,
        parent: &CancellationToken,
    ) -> Result<PathBuf> {
        let final_path = &request.file_name;
        if let Some(dir) = final_path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| part_write(final_path, source))?;
        }

        let temp_path = FileOrganizer::temp_file_path(final_path, &self.config.temp_extension);
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|source| part_write(&temp_path, source))?;

        let cancel = parent.child_token();
        let chunks = plan_chunks(request.size, self.config.chunk_size);
        let workers = worker_count(self.config.max_workers, chunks.len());
        let (slots, receivers) = chunk_slots(chunks.len());
        let failure = Arc::new(FirstError::default());

        debug!(
            "Downloading {} ({} bytes) in {} chunks with {} workers",
            final_path.display(),
            request.size,
            chunks.len(),
            workers
        );

        let job = Arc::new(ChunkJob {
            client: self.client.clone(),
            url: request.url.clone(),
            chunks,
            slots,
            next: AtomicUsize::new(0),
            tracker: ProgressTracker::new(
                request.id.clone(),
                final_path.to_string_lossy(),
                request.size,
                self.config.progress_interval,
                report,
            ),
            failure: Arc::clone(&failure),
            cancel: cancel.clone(),
        });

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            pool.spawn(Arc::clone(&job).run());
        }
        drop(job);

        let (writer, mut reader) = pipe();
        let assembler = tokio::spawn({
            let cancel = cancel.clone();
            let failure = Arc::clone(&failure);
            async move { assemble(receivers, writer, cancel, &failure).await }
        });

        let copied = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(n) => file.flush().await.map(|_| n),
            Err(err) => Err(err),
        };
        if copied.is_err() {
            cancel.cancel();
        }
        drop(reader);

        let assembled = assembler
            .await
            .unwrap_or_else(|join_err| Err(DownloadError::Io(io::Error::other(join_err))));
        while pool.join_next().await.is_some() {}

        match copied {
            Err(err) if is_assembly_abort(&err) => {
                return Err(assembled.err().unwrap_or(DownloadError::Canceled));
            }
            Err(err) => return Err(part_write(&temp_path, err)),
            Ok(_) => {}
        }
        let written = assembled?;
        drop(file);

        fs::rename(&temp_path, final_path)
            .await
            .map_err(|source| part_write(final_path, source))?;

        info!("Part {} downloaded ({} bytes)", final_path.display(), written);
        Ok(final_path.clone())
    }

    /// Fetch a caption file, run the optional transform, and write it out
    pub async fn fetch_caption(
        &self,
        url: &str,
        output: &Path,
        transform: Option<CaptionTransform>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Canceled),
            body = self.get_bytes(url) => body?,
        };

        let data = match transform {
            Some(convert) => convert(&body)
                .map_err(|e| DownloadError::Extraction(format!("caption transform failed: {e}")))?,
            None => body.to_vec(),
        };

        if let Some(dir) = output.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| part_write(output, source))?;
        }
        fs::write(output, &data)
            .await
            .map_err(|source| part_write(output, source))?;

        debug!("Caption written to {} ({} bytes)", output.display(), data.len());
        Ok(output.to_path_buf())
    }

    async fn get_bytes(&self, url: &str) -> Result<bytes::Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status));
        }
        Ok(response.bytes().await?)
    }
}

fn part_write(path: &Path, source: io::Error) -> DownloadError {
    DownloadError::PartWrite {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(chunk_size: u64, max_workers: usize) -> DownloadEngine {
        DownloadEngine::new(DownloadConfig {
            chunk_size,
            max_workers,
            progress_interval: Duration::ZERO,
            ..DownloadConfig::default()
        })
        .unwrap()
    }

    fn source_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn mount_range(server: &MockServer, body: &[u8], start: usize, end: usize, delay_ms: u64) {
        Mock::given(method("GET"))
            .and(path("/media"))
            .and(header("Range", format!("bytes={}-{}", start, end).as_str()))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(body[start..=end].to_vec())
                    .set_delay(Duration::from_millis(delay_ms)),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn test_config_from_settings() {
        let settings = AppSettings {
            chunk_size: 42,
            max_chunk_workers: 3,
            ..AppSettings::default()
        };
        let config = DownloadConfig::from(&settings);
        assert_eq!(config.chunk_size, 42);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.temp_extension, "part");
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_are_written_in_order() {
        let server = MockServer::start().await;
        let body = source_bytes(300);
        // Completion order: chunk 1, chunk 0, chunk 2
        mount_range(&server, &body, 0, 99, 150).await;
        mount_range(&server, &body, 100, 199, 10).await;
        mount_range(&server, &body, 200, 299, 300).await;

        let dir = TempDir::new().unwrap();
        let request = PartRequest {
            id: "task".to_string(),
            file_name: dir.path().join("out.mp4"),
            url: format!("{}/media", server.uri()),
            size: 300,
        };
        let (tx, mut rx) = mpsc::channel(100);

        let saved = engine(100, 2)
            .download_part(&request, tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(saved, request.file_name);
        assert_eq!(std::fs::read(&saved).unwrap(), body);
        assert!(!dir.path().join("out.mp4.part").exists(), "temp file renamed away");

        let mut last = 0;
        while let Ok(report) = rx.try_recv() {
            assert!(report.current >= last);
            last = report.current;
        }
        assert!(last > 0, "progress was reported");
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_temp_file() {
        let server = MockServer::start().await;
        let body = source_bytes(200);
        mount_range(&server, &body, 0, 99, 0).await;
        Mock::given(method("GET"))
            .and(path("/media"))
            .and(header("Range", "bytes=100-199"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0u8; 10]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let request = PartRequest {
            id: "task".to_string(),
            file_name: dir.path().join("broken.mp4"),
            url: format!("{}/media", server.uri()),
            size: 200,
        };
        let (tx, _rx) = mpsc::channel(100);

        let err = engine(100, 2)
            .download_part(&request, tx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, DownloadError::ChunkSizeMismatch { offset: 100, .. }),
            "unexpected error: {err}"
        );
        assert!(!request.file_name.exists());
        assert!(dir.path().join("broken.mp4.part").exists(), "temp file left in place");
    }

    #[tokio::test]
    async fn test_zero_size_part_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let request = PartRequest {
            id: "task".to_string(),
            file_name: dir.path().join("nested").join("empty.bin"),
            url: "http://127.0.0.1:9/unused".to_string(),
            size: 0,
        };
        let (tx, _rx) = mpsc::channel(1);

        let saved = engine(100, 2)
            .download_part(&request, tx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(saved).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_parent_aborts_part() {
        let server = MockServer::start().await;
        let body = source_bytes(100);
        mount_range(&server, &body, 0, 99, 10_000).await;

        let dir = TempDir::new().unwrap();
        let request = PartRequest {
            id: "task".to_string(),
            file_name: dir.path().join("slow.mp4"),
            url: format!("{}/media", server.uri()),
            size: 100,
        };
        let (tx, _rx) = mpsc::channel(1);
        let parent = CancellationToken::new();
        let trigger = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = engine(100, 2)
            .download_part(&request, tx, &parent)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_fetch_caption_applies_transform() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sub.srt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        fn upper(raw: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(raw.to_ascii_uppercase())
        }

        let dir = TempDir::new().unwrap();
        let output = dir.path().join("sub.srt");
        engine(100, 1)
            .fetch_caption(
                &format!("{}/sub.srt", server.uri()),
                &output,
                Some(upper as CaptionTransform),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(output).unwrap(), "HELLO");
    }
}
