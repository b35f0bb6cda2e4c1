use crate::extractor::models::MediaInfo;
use crate::extractor::traits::Extractor;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// The Hybrid Extractor Registry
///
/// Holds a list of available extractors and routes requests to the first one
/// whose `supports(url)` matches, falling back to a generic extractor.
pub struct HybridExtractor {
    extractors: Vec<Arc<dyn Extractor>>,
    fallback: Arc<dyn Extractor>,
}

impl HybridExtractor {
    /// Create a new HybridExtractor with the given registry and fallback
    pub fn new(extractors: Vec<Arc<dyn Extractor>>, fallback: Arc<dyn Extractor>) -> Self {
        Self {
            extractors,
            fallback,
        }
    }

    /// Find the best extractor for a given URL
    fn find_extractor(&self, url: &str) -> &Arc<dyn Extractor> {
        for extractor in &self.extractors {
            if extractor.supports(url) {
                debug!("Routing to extractor: {}", extractor.id());
                return extractor;
            }
        }
        debug!("Routing to fallback extractor: {}", self.fallback.id());
        &self.fallback
    }
}

#[async_trait]
impl Extractor for HybridExtractor {
    fn id(&self) -> &'static str {
        "hybrid"
    }

    fn supports(&self, url: &str) -> bool {
        self.extractors.iter().any(|e| e.supports(url)) || self.fallback.supports(url)
    }

    async fn extract(&self, url: &str) -> Result<Vec<MediaInfo>> {
        let extractor = self.find_extractor(url);
        match extractor.extract(url).await {
            Ok(media) => Ok(media),
            Err(e) if extractor.id() != self.fallback.id() => {
                info!(
                    "Primary extractor {} failed: {}. Retrying with fallback...",
                    extractor.id(),
                    e
                );
                self.fallback.extract(url).await
            }
            Err(e) => Err(e),
        }
    }
}
