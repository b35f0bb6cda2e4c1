//! Utility modules for error handling, configuration and output paths

pub mod config;
pub mod error;
pub mod organizer;
pub mod platform;

// Re-export for convenience
pub use config::AppSettings;
pub use error::{DownloadError, Result};
pub use organizer::FileOrganizer;
