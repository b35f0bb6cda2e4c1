//! Application configuration

use crate::utils::error::Result;
use crate::utils::platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Root download location; each source gets its own subdirectory
    pub download_location: PathBuf,

    /// SQLite database holding download records
    pub database_path: PathBuf,

    /// Extension appended to in-progress files
    pub temp_extension: String,

    /// Byte size of one ranged request
    pub chunk_size: u64,

    /// Upper bound on concurrent chunk requests per part
    pub max_chunk_workers: usize,

    /// Minimum milliseconds between two progress reports of one part
    pub progress_interval_ms: u64,

    /// Capacity of the progress report channel
    pub progress_buffer: usize,

    /// Number of extracted media entries kept in memory
    pub cache_capacity: usize,

    /// Number of records returned by the history listing
    pub list_limit: i64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Connect timeout for HTTP requests (seconds)
    pub connect_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            download_location: platform::default_download_dir(),
            database_path: platform::database_path(),
            temp_extension: "part".to_string(),
            chunk_size: 10 * 1024 * 1024, // 10MB
            max_chunk_workers: 10,
            progress_interval_ms: 100,
            progress_buffer: 100,
            cache_capacity: 100,
            list_limit: 50,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file, falling back to defaults for missing keys
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: AppSettings = serde_json::from_str(&raw)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings.normalized())
    }

    /// Persist settings as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Enforce sane minimums
    pub fn normalized(mut self) -> Self {
        if self.chunk_size == 0 {
            self.chunk_size = 1;
        }
        if self.max_chunk_workers == 0 {
            self.max_chunk_workers = 1;
        }
        if self.progress_buffer == 0 {
            self.progress_buffer = 1;
        }
        if self.cache_capacity == 0 {
            self.cache_capacity = 1;
        }
        if self.temp_extension.is_empty() {
            self.temp_extension = "part".to_string();
        }
        self
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
