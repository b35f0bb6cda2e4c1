//! Bounded cache of extracted media, keyed by generated ids

use crate::extractor::MediaInfo;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Default number of extraction results kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Default)]
struct CacheInner {
    data: HashMap<String, MediaInfo>,
    keys: VecDeque<String>,
}

/// FIFO cache of [`MediaInfo`]; the oldest entry is evicted once full
#[derive(Debug)]
pub struct ExtractorCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl Default for ExtractorCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ExtractorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Store `media` under a fresh `<source>-<uuid>` id and return it with that id set
    pub async fn cache(&self, mut media: MediaInfo) -> MediaInfo {
        let id = format!("{}-{}", media.source, Uuid::new_v4());
        media.id = id.clone();
        self.add(id, media.clone()).await;
        media
    }

    /// Insert or replace `key`, evicting the oldest entry when at capacity
    pub async fn add(&self, key: String, value: MediaInfo) {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.data.get_mut(&key) {
            *existing = value;
            return;
        }

        if inner.data.len() >= self.capacity {
            if let Some(oldest) = inner.keys.pop_front() {
                debug!("Evicting cached media {}", oldest);
                inner.data.remove(&oldest);
            }
        }

        inner.keys.push_back(key.clone());
        inner.data.insert(key, value);
    }

    pub async fn get(&self, key: &str) -> Option<MediaInfo> {
        self.inner.lock().await.data.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
