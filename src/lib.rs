//! mediafetch library

pub mod database;
pub mod downloader;
pub mod extractor;
pub mod queue;
pub mod utils;

// Re-export main types for easier use
pub use database::{DatabaseManager, DownloadRecord, DownloadStore};
pub use downloader::{DownloadConfig, DownloadEngine, FfmpegMuxer, Muxer, PartRequest};
pub use extractor::{Extractor, HybridExtractor, ManifestExtractor, MediaInfo};
pub use queue::{DownloadRequest, DownloadResponse, DownloadTask, Notifier, TaskStatus, WorkQueue};
pub use utils::{AppSettings, DownloadError};
