//! Chapter timestamp resolution.
//!
//! Resolution order for `(audiobook_id, chapter_number)`:
//! 1. the in-memory bundle cache,
//! 2. the offline bundle file for the audiobook,
//! 3. the network endpoint for the single chapter.
//!
//! Missing narration timestamps are a normal state, not a fault: every failure
//! along the way is logged and resolution returns `None`.

mod cache;
mod client;

pub use cache::{BundleCache, CacheLookup};
pub use client::{ChapterFetch, HttpTimestampClient, TimestampClient};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::timestamps::{AudiobookTimestamps, ChapterTimestamps};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),
    #[error("No offline bundle for audiobook {0}")]
    NotFound(String),
}

/// The seam the sync engine resolves timestamps through (allows fakes in tests)
#[async_trait::async_trait]
pub trait TimestampResolver: Send + Sync {
    /// Timestamps for one chapter, or `None` when unavailable for any reason
    async fn resolve(&self, audiobook_id: &str, chapter_number: u32)
        -> Option<Arc<ChapterTimestamps>>;

    /// Changes whenever previously resolved data may have been dropped
    fn cache_epoch(&self) -> u64 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one offline bundle file per audiobook
    pub timestamps_dir: PathBuf,
}

#[derive(Clone)]
pub struct TimestampStore {
    config: StoreConfig,
    cache: BundleCache,
    client: Option<Arc<dyn TimestampClient>>,
}

impl TimestampStore {
    pub fn new(config: StoreConfig, cache: BundleCache) -> Self {
        Self {
            config,
            cache,
            client: None,
        }
    }

    /// Enable the network fallback
    pub fn with_client(mut self, client: Arc<dyn TimestampClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn cache(&self) -> &BundleCache {
        &self.cache
    }

    /// Deterministic bundle location for an audiobook
    pub fn offline_bundle_path(&self, audiobook_id: &str) -> PathBuf {
        bundle_path(&self.config.timestamps_dir, audiobook_id)
    }

    pub async fn has_offline_bundle(&self, audiobook_id: &str) -> bool {
        fs::try_exists(self.offline_bundle_path(audiobook_id))
            .await
            .unwrap_or(false)
    }

    /// Read and decode the offline bundle, bypassing the memory cache
    pub async fn load_offline_bundle(
        &self,
        audiobook_id: &str,
    ) -> Result<AudiobookTimestamps, StoreError> {
        let path = self.offline_bundle_path(audiobook_id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(audiobook_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut bundle = AudiobookTimestamps::from_json(&data)?;
        if bundle.audiobook_id.is_empty() {
            bundle.audiobook_id = audiobook_id.to_string();
        }
        Ok(bundle)
    }

    /// Persist a bundle for offline use and make it the cached copy
    pub async fn save_offline_bundle(
        &self,
        bundle: &AudiobookTimestamps,
    ) -> Result<PathBuf, StoreError> {
        let path = self.offline_bundle_path(&bundle.audiobook_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec(bundle)?;
        let temp_path = unique_temp_path(&path);
        fs::write(&temp_path, &data).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        self.cache.insert(bundle.clone()).await;
        info!(
            audiobook_id = %bundle.audiobook_id,
            chapters = bundle.chapters.len(),
            path = %path.display(),
            "Saved offline timestamp bundle"
        );
        Ok(path)
    }

    /// Delete the offline bundle file and its cached copy
    pub async fn remove_offline_bundle(&self, audiobook_id: &str) -> Result<(), StoreError> {
        self.cache.remove(audiobook_id).await;
        match fs::remove_file(self.offline_bundle_path(audiobook_id)).await {
            Ok(()) => {
                info!(%audiobook_id, "Removed offline timestamp bundle");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn clear_memory_cache(&self) {
        self.cache.clear().await;
    }

    async fn resolve_from_disk(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Option<Arc<ChapterTimestamps>> {
        match self.load_offline_bundle(audiobook_id).await {
            Ok(mut bundle) => {
                if bundle.audiobook_id != audiobook_id {
                    debug!(
                        %audiobook_id,
                        bundle_id = %bundle.audiobook_id,
                        "Offline bundle id differs from its file key"
                    );
                    bundle.audiobook_id = audiobook_id.to_string();
                }
                self.cache.insert(bundle).await;
                match self.cache.lookup(audiobook_id, chapter_number).await {
                    CacheLookup::Hit(chapter) => Some(chapter),
                    _ => {
                        debug!(
                            %audiobook_id,
                            chapter_number, "Offline bundle has no entry for chapter"
                        );
                        None
                    }
                }
            }
            Err(StoreError::NotFound(_)) => {
                debug!(%audiobook_id, "No offline timestamp bundle");
                None
            }
            Err(e) => {
                warn!(%audiobook_id, "Failed to load offline timestamp bundle: {}", e);
                None
            }
        }
    }

    async fn resolve_from_network(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Option<Arc<ChapterTimestamps>> {
        let client = self.client.as_ref()?;
        match client.fetch_chapter(audiobook_id, chapter_number).await {
            Ok(ChapterFetch::Available(timestamps)) => {
                debug!(
                    %audiobook_id,
                    chapter_number,
                    segments = timestamps.segments.len(),
                    "Fetched chapter timestamps"
                );
                Some(Arc::new(timestamps))
            }
            Ok(ChapterFetch::NoTimestamps) => {
                debug!(%audiobook_id, chapter_number, "Server has no timestamps for chapter");
                None
            }
            Err(e) => {
                warn!(
                    %audiobook_id,
                    chapter_number, "Failed to fetch chapter timestamps: {}", e
                );
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl TimestampResolver for TimestampStore {
    async fn resolve(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Option<Arc<ChapterTimestamps>> {
        match self.cache.lookup(audiobook_id, chapter_number).await {
            CacheLookup::Hit(chapter) => return Some(chapter),
            // The bundle was already read from disk; only the network can help
            CacheLookup::MissingChapter => {}
            CacheLookup::Miss => {
                if let Some(chapter) = self.resolve_from_disk(audiobook_id, chapter_number).await {
                    return Some(chapter);
                }
            }
        }
        self.resolve_from_network(audiobook_id, chapter_number).await
    }

    fn cache_epoch(&self) -> u64 {
        self.cache.epoch()
    }
}

fn bundle_path(dir: &Path, audiobook_id: &str) -> PathBuf {
    let name: String = audiobook_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{}.json", name))
}

fn unique_temp_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nonce = SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut temp_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("bundle.json")
        .to_string();
    temp_name.push_str(&format!(".tmp-{}-{nonce}", ts_nanos));
    path.with_file_name(temp_name)
}
