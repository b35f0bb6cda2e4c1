use crate::extractor::models::MediaInfo;
use anyhow::Result;
use async_trait::async_trait;

/// Core trait for all media extractors
///
/// Site-specific parsing lives behind this trait; the download engine only
/// ever sees the resulting [`MediaInfo`] entries.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns a unique identifier for this extractor (e.g., "manifest")
    fn id(&self) -> &'static str;

    /// Checks if this extractor can handle the given URL
    fn supports(&self, url: &str) -> bool;

    /// Extracts every media entry found at `url`
    async fn extract(&self, url: &str) -> Result<Vec<MediaInfo>>;
}
