//! Chunk planning and ranged chunk downloads

use crate::downloader::progress::ProgressTracker;
use crate::utils::error::{DownloadError, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::Client;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default chunk size (10 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Upper bound on concurrent chunk requests per part
pub const MAX_CHUNK_WORKERS: usize = 10;

/// One byte range of a part, `end` inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Split `size` bytes into contiguous ranges of `chunk_size`, last one truncated
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<Chunk> {
    if size == 0 {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    let count = size.div_ceil(chunk_size) as usize;

    let mut chunks = Vec::with_capacity(count);
    let mut start = 0u64;
    for index in 0..count {
        let end = (start + chunk_size).min(size) - 1;
        chunks.push(Chunk { index, start, end });
        start = end + 1;
    }
    chunks
}

/// Workers to spawn for `chunk_count` chunks under `cap`
pub fn worker_count(cap: usize, chunk_count: usize) -> usize {
    cap.max(1).min(chunk_count)
}

/// Single-use handoff for one chunk's payload.
///
/// The sender is taken at most once; dropping it without sending closes the
/// slot, which the assembler reads as "this chunk failed".
#[derive(Debug)]
pub struct ChunkSlot {
    tx: Mutex<Option<oneshot::Sender<Bytes>>>,
}

impl ChunkSlot {
    pub fn take(&self) -> Option<oneshot::Sender<Bytes>> {
        match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// One slot per chunk plus the matching receivers, in index order
pub fn chunk_slots(count: usize) -> (Vec<ChunkSlot>, Vec<oneshot::Receiver<Bytes>>) {
    (0..count)
        .map(|_| {
            let (tx, rx) = oneshot::channel();
            (ChunkSlot { tx: Mutex::new(Some(tx)) }, rx)
        })
        .unzip()
}

/// Fetch one chunk, aborting as soon as `cancel` fires
pub async fn download_chunk(
    client: &Client,
    url: &str,
    chunk: &Chunk,
    tracker: &ProgressTracker,
    cancel: &CancellationToken,
) -> Result<Bytes> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Canceled),
        result = fetch_range(client, url, chunk, tracker) => result,
    }
}

async fn fetch_range(
    client: &Client,
    url: &str,
    chunk: &Chunk,
    tracker: &ProgressTracker,
) -> Result<Bytes> {
    debug!("Downloading chunk {} ({})", chunk.index, chunk.range_header());

    let response = client
        .get(url)
        .header(RANGE, chunk.range_header())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus(status));
    }

    let expected = chunk.size();
    let mut buffer = BytesMut::with_capacity(expected as usize);
    let mut stream = response.bytes_stream();
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        tracker.add(piece.len() as u64);
        buffer.extend_from_slice(&piece);
    }

    let actual = buffer.len() as u64;
    if actual != expected {
        return Err(DownloadError::ChunkSizeMismatch {
            offset: chunk.start,
            expected,
            actual,
        });
    }

    Ok(buffer.freeze())
}
