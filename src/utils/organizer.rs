//! Output path management: per-source directories, sanitized names, collision suffixes

use crate::utils::error::Result;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Layout used for collision suffixes, e.g. `20240131235959`
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Resolves where downloaded files land on disk
#[derive(Debug, Clone)]
pub struct FileOrganizer {
    pub base_dir: PathBuf,
}

impl FileOrganizer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory for one source (`youtube`, `bilibili`, ...), created on demand
    pub async fn source_dir(&self, source: &str) -> Result<PathBuf> {
        let dir = self.base_dir.join(Self::sanitize_filename(source));
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            debug!("Creating source directory {}", dir.display());
            fs::create_dir_all(&dir).await?;
        }
        Ok(dir)
    }

    /// Build an output path `<base>/<source>/<title>[_<add>...].<ext>`.
    ///
    /// Non-empty `adds` are appended to the title with `_`. If the resulting
    /// file already exists a timestamp suffix is added.
    pub async fn output_file(
        &self,
        source: &str,
        title: &str,
        ext: &str,
        adds: &[&str],
    ) -> Result<PathBuf> {
        let dir = self.source_dir(source).await?;

        let mut title = title.to_string();
        for add in adds.iter().filter(|a| !a.is_empty()) {
            title = format!("{}_{}", title, add);
        }
        let title = Self::sanitize_filename(&title);

        let candidate = dir.join(Self::with_ext(&title, ext));
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            return Ok(candidate);
        }

        let stamped = format!("{}_{}", title, Local::now().format(TIMESTAMP_FORMAT));
        Ok(dir.join(Self::with_ext(&stamped, ext)))
    }

    /// Merged output for a stream; the resolution is the first word of the quality label
    pub async fn stream_file_path(
        &self,
        source: &str,
        title: &str,
        quality: &str,
        ext: &str,
    ) -> Result<PathBuf> {
        let resolution = quality.split(' ').next().unwrap_or_default();
        self.output_file(source, title, ext, &[resolution]).await
    }

    /// Caption output, suffixed with its language code
    pub async fn caption_file_path(
        &self,
        source: &str,
        title: &str,
        ext: &str,
        language_code: &str,
    ) -> Result<PathBuf> {
        self.output_file(source, title, ext, &[language_code]).await
    }

    /// In-progress path for `final_path`: `<final>.<temp_ext>`, or a
    /// timestamped variant when a stale temp file already occupies it.
    pub fn temp_file_path(final_path: &Path, temp_ext: &str) -> PathBuf {
        let name = final_path.to_string_lossy();
        let temp = PathBuf::from(format!("{}.{}", name, temp_ext));
        if !temp.exists() {
            return temp;
        }
        PathBuf::from(format!(
            "{}_{}.{}",
            name,
            Local::now().format(TIMESTAMP_FORMAT),
            temp_ext
        ))
    }

    fn with_ext(stem: &str, ext: &str) -> String {
        if ext.is_empty() {
            stem.to_string()
        } else {
            format!("{}.{}", stem, ext)
        }
    }

    /// Sanitize filename to prevent path traversal and filesystem errors
    ///
    /// - Removes `..` sequences
    /// - Replaces characters invalid on common filesystems with `_`
    /// - Strips leading dots and trailing dots/spaces
    /// - Collapses repeated underscores
    /// - Limits the name to 200 characters, keeping a short extension
    ///
    /// # Examples
    /// ```
    /// use mediafetch::utils::organizer::FileOrganizer;
    /// assert_eq!(FileOrganizer::sanitize_filename("../../etc/passwd"), "_etc_passwd");
    /// assert_eq!(FileOrganizer::sanitize_filename(".hidden"), "hidden");
    /// assert_eq!(FileOrganizer::sanitize_filename("normal_file.mp4"), "normal_file.mp4");
    /// ```
    pub fn sanitize_filename(name: &str) -> String {
        let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

        let mut sanitized: String = name
            .replace("..", "")
            .chars()
            .map(|c| {
                if invalid_chars.contains(&c) || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect();

        sanitized = sanitized.trim().trim_start_matches('.').to_string();
        sanitized = sanitized.trim_end_matches('.').trim_end().to_string();

        while sanitized.contains("__") {
            sanitized = sanitized.replace("__", "_");
        }

        if sanitized.is_empty() {
            return "unnamed_file".to_string();
        }

        const MAX_CHARS: usize = 200;
        if sanitized.chars().count() > MAX_CHARS {
            if let Some(dot_pos) = sanitized.rfind('.') {
                let extension = &sanitized[dot_pos..];
                if extension.chars().count() < 10 {
                    let keep = MAX_CHARS - extension.chars().count();
                    let name_part: String = sanitized.chars().take(keep).collect();
                    return format!("{}{}", name_part, extension);
                }
            }
            sanitized = sanitized.chars().take(MAX_CHARS).collect();
        }

        sanitized
    }
}
