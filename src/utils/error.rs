//! Error handling for the download engine

use thiserror::Error;

/// Main error type for mediafetch
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("chunk at offset {offset} has invalid size: expected={expected} actual={actual}")]
    ChunkSizeMismatch {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("chunk transport error: {0}")]
    ChunkTransport(#[from] reqwest::Error),

    #[error("failed to download chunk: HTTP {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("failed to write part {path}: {source}")]
    PartWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("progress target not live: id={id} file={file_name}")]
    StaleProgressTarget { id: String, file_name: String },

    #[error("failed to mux parts: {message}, {stderr}")]
    Mux { message: String, stderr: String },

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("cached media not found: {0}")]
    CacheMiss(String),

    #[error("requested {kind}:{code} is downloading")]
    AlreadyDownloading { kind: &'static str, code: String },

    #[error("no stream parts")]
    NoParts,

    #[error("nothing to download for {0}")]
    NothingToDownload(String),

    #[error("some parts download failed: [{}]", .0.join("; "))]
    PartsFailed(Vec<String>),

    #[error("download canceled")]
    Canceled,

    #[error("work queue dispatcher already started")]
    DispatcherStarted,

    #[error("Failed to extract media info: {0}")]
    Extraction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DownloadError {
    /// True when the error only reflects a cancelled token.
    pub fn is_canceled(&self) -> bool {
        matches!(self, DownloadError::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
