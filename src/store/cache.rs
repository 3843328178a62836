use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::timestamps::{AudiobookTimestamps, ChapterTimestamps};

/// Outcome of a memory cache lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Bundle cached and it has the chapter
    Hit(Arc<ChapterTimestamps>),
    /// Bundle cached but the chapter is not in it
    MissingChapter,
    /// No bundle cached for this audiobook
    Miss,
}

/// In-memory cache of decoded offline bundles, keyed by audiobook id.
///
/// Cloning is cheap (clones Arc) and all clones share the same entries. Bundles
/// are inserted after a disk load or an offline save and then only read. Every
/// clear, removal or replacement bumps the epoch so that sync engines holding
/// chapter data from an older bundle know to re-resolve.
#[derive(Clone, Default)]
pub struct BundleCache {
    inner: Arc<BundleCacheInner>,
}

#[derive(Default)]
struct BundleCacheInner {
    bundles: RwLock<HashMap<String, BTreeMap<u32, Arc<ChapterTimestamps>>>>,
    epoch: AtomicU64,
}

// Process-wide instance shared by every store that does not bring its own
static GLOBAL_BUNDLE_CACHE: OnceLock<BundleCache> = OnceLock::new();

impl BundleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache
    pub fn global() -> BundleCache {
        GLOBAL_BUNDLE_CACHE.get_or_init(BundleCache::new).clone()
    }

    pub async fn lookup(&self, audiobook_id: &str, chapter_number: u32) -> CacheLookup {
        let bundles = self.inner.bundles.read().await;
        match bundles.get(audiobook_id) {
            Some(chapters) => match chapters.get(&chapter_number) {
                Some(chapter) => CacheLookup::Hit(chapter.clone()),
                None => CacheLookup::MissingChapter,
            },
            None => CacheLookup::Miss,
        }
    }

    pub async fn get_chapter(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Option<Arc<ChapterTimestamps>> {
        match self.lookup(audiobook_id, chapter_number).await {
            CacheLookup::Hit(chapter) => Some(chapter),
            CacheLookup::MissingChapter | CacheLookup::Miss => None,
        }
    }

    /// Cache a decoded bundle. Replacing an existing entry bumps the epoch.
    pub async fn insert(&self, bundle: AudiobookTimestamps) {
        let chapter_count = bundle.chapters.len();
        let chapters = bundle
            .chapters
            .into_iter()
            .map(|(number, chapter)| (number, Arc::new(chapter)))
            .collect();

        let replaced = self
            .inner
            .bundles
            .write()
            .await
            .insert(bundle.audiobook_id.clone(), chapters)
            .is_some();
        if replaced {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        }
        debug!(
            audiobook_id = %bundle.audiobook_id,
            chapters = chapter_count,
            replaced,
            "Cached timestamp bundle"
        );
    }

    pub async fn contains(&self, audiobook_id: &str) -> bool {
        self.inner.bundles.read().await.contains_key(audiobook_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.bundles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop one audiobook's bundle
    pub async fn remove(&self, audiobook_id: &str) -> bool {
        let removed = self
            .inner
            .bundles
            .write()
            .await
            .remove(audiobook_id)
            .is_some();
        if removed {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            debug!(%audiobook_id, "Removed cached timestamp bundle");
        }
        removed
    }

    /// Drop every cached bundle (environment or account switch)
    pub async fn clear(&self) {
        let mut bundles = self.inner.bundles.write().await;
        let count = bundles.len();
        bundles.clear();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        info!(bundles = count, "Cleared timestamp bundle cache");
    }

    /// Incremented on every clear, removal or replacement
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(id: &str, chapters: &[u32]) -> AudiobookTimestamps {
        AudiobookTimestamps {
            audiobook_id: id.to_string(),
            chapters: chapters
                .iter()
                .map(|n| (*n, ChapterTimestamps::default()))
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lookup_outcomes() {
        let cache = BundleCache::new();
        assert!(matches!(cache.lookup("a", 1).await, CacheLookup::Miss));

        cache.insert(bundle("a", &[1, 2])).await;
        assert!(matches!(cache.lookup("a", 1).await, CacheLookup::Hit(_)));
        assert!(matches!(
            cache.lookup("a", 3).await,
            CacheLookup::MissingChapter
        ));
        assert!(matches!(cache.lookup("b", 1).await, CacheLookup::Miss));

        assert!(cache.get_chapter("a", 2).await.is_some());
        assert!(cache.get_chapter("a", 3).await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = BundleCache::new();
        let other = cache.clone();
        cache.insert(bundle("a", &[1])).await;
        assert!(other.contains("a").await);
        assert_eq!(other.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_and_remove_bump_epoch() {
        let cache = BundleCache::new();
        cache.insert(bundle("a", &[1])).await;
        cache.insert(bundle("b", &[1])).await;
        assert_eq!(cache.epoch(), 0);

        assert!(cache.remove("a").await);
        assert_eq!(cache.epoch(), 1);
        assert!(!cache.remove("a").await);
        assert_eq!(cache.epoch(), 1);

        cache.clear().await;
        assert_eq!(cache.epoch(), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_replacing_a_bundle_bumps_epoch() {
        let cache = BundleCache::new();
        cache.insert(bundle("a", &[1])).await;
        assert_eq!(cache.epoch(), 0);

        cache.insert(bundle("a", &[1, 2])).await;
        assert_eq!(cache.epoch(), 1);
        assert!(cache.get_chapter("a", 2).await.is_some());
    }

    #[tokio::test]
    async fn test_global_is_shared() {
        let a = BundleCache::global();
        let b = BundleCache::global();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
