//! Platform-specific utilities for mediafetch
//!
//! This module provides cross-platform abstractions for:
//! - Application directories (data, downloads)
//! - Database location

use std::path::PathBuf;

/// Returns the application data directory
/// - macOS: ~/Library/Application Support/mediafetch
/// - Windows: %APPDATA%\mediafetch
/// - Linux: ~/.local/share/mediafetch
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mediafetch")
}

/// Returns the default download directory
/// - All platforms: ~/Downloads/mediafetch
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("mediafetch")
}

/// Returns the database file path inside the data directory
pub fn database_path() -> PathBuf {
    app_data_dir().join("mediafetch.db")
}

/// Returns the settings file path inside the data directory
pub fn settings_path() -> PathBuf {
    app_data_dir().join("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_namespaced() {
        assert!(app_data_dir().ends_with("mediafetch"));
        assert!(default_download_dir().ends_with("mediafetch"));
        assert_eq!(
            database_path().file_name().and_then(|n| n.to_str()),
            Some("mediafetch.db")
        );
        assert!(settings_path().starts_with(app_data_dir()));
    }
}
