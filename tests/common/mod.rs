//! Shared fixtures for the integration tests: a ranged HTTP origin, a
//! recording muxer and a queue wired to a temp directory.

#![allow(dead_code)]

use async_trait::async_trait;
use mediafetch::database::{initialize_database, DatabaseManager};
use mediafetch::downloader::Muxer;
use mediafetch::extractor::{Caption, Extractor, MediaInfo, Stream, StreamPart};
use mediafetch::queue::{ChannelNotifier, DataType, DownloadResponse, WorkQueue};
use mediafetch::utils::{AppSettings, DownloadError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHUNK: u64 = 100;

/// Deterministic payload of `len` bytes, distinct per `seed`
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Serve `body` at `route` as `CHUNK`-sized ranged responses
pub async fn mount_ranged(server: &MockServer, route: &str, body: &[u8]) {
    for (i, chunk) in body.chunks(CHUNK as usize).enumerate() {
        let start = i as u64 * CHUNK;
        let end = start + chunk.len() as u64 - 1;
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("Range", format!("bytes={}-{}", start, end).as_str()))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(chunk.to_vec()))
            .mount(server)
            .await;
    }
}

/// Muxer that records its calls and concatenates inputs into the output
#[derive(Default)]
pub struct RecordingMuxer {
    pub calls: Mutex<Vec<(Vec<PathBuf>, PathBuf)>>,
    pub fail: bool,
}

impl RecordingMuxer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(Vec<PathBuf>, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Muxer for RecordingMuxer {
    async fn mux(&self, inputs: &[PathBuf], output: &Path) -> mediafetch::utils::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((inputs.to_vec(), output.to_path_buf()));
        if self.fail {
            return Err(DownloadError::Mux {
                message: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        let mut merged = Vec::new();
        for input in inputs {
            merged.extend(tokio::fs::read(input).await?);
        }
        tokio::fs::write(output, merged).await?;
        Ok(())
    }

    async fn version(&self) -> mediafetch::utils::Result<String> {
        Ok("ffmpeg version test".to_string())
    }
}

pub struct StaticExtractor(pub Vec<MediaInfo>);

#[async_trait]
impl Extractor for StaticExtractor {
    fn id(&self) -> &'static str {
        "static"
    }

    fn supports(&self, _url: &str) -> bool {
        true
    }

    async fn extract(&self, _url: &str) -> anyhow::Result<Vec<MediaInfo>> {
        Ok(self.0.clone())
    }
}

/// Media "Demo" with stream `hd` whose parts live at `/p0`, `/p1`, ...
pub fn demo_media(base: &str, sizes: &[u64], need_mux: bool) -> MediaInfo {
    let mut media = MediaInfo {
        source: "demo".to_string(),
        site: "demo.test".to_string(),
        title: "Demo".to_string(),
        url: "https://demo.test/watch".to_string(),
        ..Default::default()
    };
    media.streams.insert(
        "hd".to_string(),
        Stream {
            id: "hd".to_string(),
            quality: "1080P high bitrate".to_string(),
            parts: sizes
                .iter()
                .enumerate()
                .map(|(i, size)| StreamPart {
                    url: format!("{}/p{}", base, i),
                    size: *size,
                    ext: "mp4".to_string(),
                })
                .collect(),
            size: sizes.iter().sum(),
            ext: "mp4".to_string(),
            need_mux,
        },
    );
    media.captions.insert(
        "en".to_string(),
        Caption {
            url: format!("{}/en.srt", base),
            ext: "srt".to_string(),
            language_code: "en".to_string(),
        },
    );
    media
}

pub struct Harness {
    pub queue: WorkQueue,
    pub updates: UnboundedReceiver<DownloadResponse>,
    pub muxer: Arc<RecordingMuxer>,
    pub store: Arc<DatabaseManager>,
    pub dispatcher: JoinHandle<()>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(media: Vec<MediaInfo>, muxer: RecordingMuxer) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let settings = AppSettings {
            download_location: dir.path().join("downloads"),
            database_path: dir.path().join("mediafetch.db"),
            chunk_size: CHUNK,
            max_chunk_workers: 4,
            progress_interval_ms: 0,
            ..Default::default()
        };
        let pool = initialize_database(&settings.database_path)
            .await
            .expect("database");
        let store = Arc::new(DatabaseManager::new(pool));
        let muxer = Arc::new(muxer);
        let (notifier, updates) = ChannelNotifier::new();

        let queue = WorkQueue::new(
            settings,
            store.clone(),
            Arc::new(notifier),
            muxer.clone(),
            Arc::new(StaticExtractor(media)),
        )
        .expect("queue");
        let dispatcher = queue.start().await.expect("dispatcher");

        Self {
            queue,
            updates,
            muxer,
            store,
            dispatcher,
            dir,
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.dir.path().join("downloads").join("demo")
    }

    /// Collect notifications until the terminal one for `id`
    pub async fn wait_final(&mut self, id: &str) -> (DownloadResponse, Vec<DownloadResponse>) {
        let mut seen = Vec::new();
        loop {
            let update = tokio::time::timeout(Duration::from_secs(10), self.updates.recv())
                .await
                .expect("timed out waiting for notifications")
                .expect("notifier closed");
            let done = update.id == id
                && update.data_type == DataType::All
                && update.status.is_terminal();
            seen.push(update.clone());
            if done {
                return (update, seen);
            }
        }
    }

    pub async fn shutdown(self) {
        self.queue.shutdown();
        let _ = self.dispatcher.await;
    }
}
