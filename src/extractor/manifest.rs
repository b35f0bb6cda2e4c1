//! Extractor for pre-resolved JSON manifests
//!
//! A manifest is either one [`MediaInfo`] object or an array of them, served
//! over HTTP(S) or read from a local path. It lets the engine run without any
//! site-specific parser.

use crate::extractor::models::MediaInfo;
use crate::extractor::traits::Extractor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    Many(Vec<MediaInfo>),
    One(Box<MediaInfo>),
}

pub struct ManifestExtractor {
    client: Client,
}

impl ManifestExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn is_remote(url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn load(&self, url: &str) -> Result<String> {
        if Self::is_remote(url) {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("Failed to fetch manifest {}", url))?
                .error_for_status()?;
            Ok(response.text().await?)
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read manifest {}", path))
        }
    }

    /// Parse manifest text into filled-up media entries
    pub fn parse(raw: &str) -> Result<Vec<MediaInfo>> {
        let manifest: Manifest = serde_json::from_str(raw).context("Invalid manifest JSON")?;
        let mut media = match manifest {
            Manifest::Many(list) => list,
            Manifest::One(one) => vec![*one],
        };
        for info in media.iter_mut() {
            info.fill_up_streams();
        }
        Ok(media)
    }
}

#[async_trait]
impl Extractor for ManifestExtractor {
    fn id(&self) -> &'static str {
        "manifest"
    }

    fn supports(&self, url: &str) -> bool {
        url.split('?').next().unwrap_or(url).ends_with(".json")
    }

    async fn extract(&self, url: &str) -> Result<Vec<MediaInfo>> {
        debug!("Loading manifest from {}", url);
        let raw = self.load(url).await?;
        Self::parse(&raw)
    }
}
