//! Data structures for extracted media information

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Converts a raw caption payload into the bytes written to disk
pub type CaptionTransform = fn(&[u8]) -> Result<Vec<u8>>;

/// Everything an extractor learned about one page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Cache key, assigned when the entry is cached
    #[serde(default)]
    pub id: String,
    /// Website source name: youtube, bilibili, ...
    pub source: String,
    /// Website host: youtube.com, bilibili.com, ...
    #[serde(default)]
    pub site: String,
    pub title: String,
    pub url: String,
    /// Keyed by stream id, e.g. "1080"
    #[serde(default)]
    pub streams: HashMap<String, Stream>,
    /// Keyed by caption id
    #[serde(default)]
    pub captions: HashMap<String, Caption>,
    #[serde(skip)]
    pub caption_transform: Option<CaptionTransform>,
}

/// One selectable quality; may consist of several physical files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stream {
    #[serde(default)]
    pub id: String,
    /// e.g. "1080P high bitrate"
    #[serde(default)]
    pub quality: String,
    pub parts: Vec<StreamPart>,
    /// Total of all parts
    #[serde(default)]
    pub size: u64,
    /// Extension of the merged file
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub need_mux: bool,
}

/// One physical file of a stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamPart {
    pub url: String,
    pub size: u64,
    pub ext: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Caption {
    pub url: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub language_code: String,
}

impl MediaInfo {
    /// Fill derived stream fields: id, quality, merged extension and size.
    /// Streams with zero total size are dropped.
    pub fn fill_up_streams(&mut self) {
        for (id, stream) in self.streams.iter_mut() {
            stream.id = id.clone();
            if stream.quality.is_empty() {
                stream.quality = id.clone();
            }

            if stream.ext.is_empty() {
                if let Some(first) = stream.parts.first() {
                    // ts and flv segments are merged into mp4
                    stream.ext = match first.ext.as_str() {
                        "ts" | "flv" | "f4v" => "mp4".to_string(),
                        other => other.to_string(),
                    };
                }
            }

            if stream.size == 0 {
                stream.size = stream.parts.iter().map(|p| p.size).sum();
            }
        }

        self.streams.retain(|_, stream| stream.size > 0);
    }
}
