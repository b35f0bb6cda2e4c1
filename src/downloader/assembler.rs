//! Ordered reassembly of chunk payloads into a byte pipe
//!
//! Chunks complete in any order; the assembler waits on their slots strictly
//! by index and forwards each payload into the pipe, so the reader always sees
//! the part's bytes in offset order.

use crate::utils::error::{DownloadError, Result};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;
use std::fmt;
use std::io;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type PipeWriter = mpsc::Sender<io::Result<Bytes>>;
pub type PipeReader = StreamReader<mpsc::Receiver<io::Result<Bytes>>, Bytes>;

/// Unbuffered byte pipe: each payload waits until the reader has taken the previous one
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(0);
    (tx, StreamReader::new(rx))
}

/// Error pushed into the pipe when assembly aborts
#[derive(Debug)]
struct AssemblyAborted(String);

impl fmt::Display for AssemblyAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assembly aborted: {}", self.0)
    }
}

impl std::error::Error for AssemblyAborted {}

/// True if the reader failed because the assembler aborted, not because of local I/O
pub fn is_assembly_abort(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<AssemblyAborted>())
}

/// First chunk error of a part; later errors are dropped
#[derive(Debug, Default)]
pub struct FirstError(Mutex<Option<DownloadError>>);

impl FirstError {
    pub fn record(&self, err: DownloadError) {
        let mut slot = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(err);
        } else {
            debug!("Dropping secondary chunk error: {}", err);
        }
    }

    pub fn take(&self) -> Option<DownloadError> {
        match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Forward every chunk in index order; returns total bytes written.
///
/// On any failure the error is pushed into the pipe and `cancel` fires so
/// in-flight siblings are abandoned. The writer is dropped on return, which
/// is a clean EOF only after the last chunk.
pub async fn assemble(
    receivers: Vec<oneshot::Receiver<Bytes>>,
    mut writer: PipeWriter,
    cancel: CancellationToken,
    failure: &FirstError,
) -> Result<u64> {
    let mut written = 0u64;

    for (index, rx) in receivers.into_iter().enumerate() {
        let payload = tokio::select! {
            biased;
            received = rx => received.ok(),
            _ = cancel.cancelled() => None,
        };

        let Some(bytes) = payload else {
            let err = failure.take().unwrap_or(DownloadError::Canceled);
            debug!("Chunk {} unavailable, aborting assembly: {}", index, err);
            abort(&mut writer, &cancel, &err).await;
            return Err(err);
        };

        written += bytes.len() as u64;
        if writer.send(Ok(bytes)).await.is_err() {
            let err = DownloadError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe reader closed",
            ));
            cancel.cancel();
            return Err(err);
        }
    }

    Ok(written)
}

async fn abort(writer: &mut PipeWriter, cancel: &CancellationToken, err: &DownloadError) {
    cancel.cancel();
    let pipe_err = io::Error::other(AssemblyAborted(err.to_string()));
    // Reader may already be gone
    let _ = writer.send(Err(pipe_err)).await;
}
