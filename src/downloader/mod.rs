//! Download engine module

pub mod assembler;
pub mod engine;
pub mod merger;
pub mod progress;
pub mod segment;

// Re-export for convenience
pub use engine::{DownloadConfig, DownloadEngine, PartRequest};
pub use merger::{FfmpegMuxer, Muxer};
pub use progress::{ProgressReport, ProgressTracker};
pub use segment::{plan_chunks, Chunk};
