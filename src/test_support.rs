// Test support utilities for both unit and integration tests

use crate::store::{ChapterFetch, StoreError, TimestampClient, TimestampResolver};
use crate::timestamps::{
    AudiobookTimestamps, ChapterTimestamps, TimestampMethod, TimestampSegment, WordTimestamp,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type ChapterKey = (String, u32);

fn key(audiobook_id: &str, chapter_number: u32) -> ChapterKey {
    (audiobook_id.to_string(), chapter_number)
}

fn word(word: &str, start_time: f64, end_time: f64, char_start: usize, char_end: usize) -> WordTimestamp {
    WordTimestamp {
        word: word.to_string(),
        start_time,
        end_time,
        char_start,
        char_end,
    }
}

/// Two segments over "First line. Second segment":
/// `[0s, 2s)` covers chars `[0, 10)`, `[2s, 5s)` covers chars `[10, 25)`
pub fn sample_chapter() -> ChapterTimestamps {
    ChapterTimestamps {
        version: "1.0".to_string(),
        generated_at: None,
        method: TimestampMethod::Automated,
        language: "en".to_string(),
        duration: 5.0,
        segments: vec![
            TimestampSegment {
                id: 0,
                start_time: 0.0,
                end_time: 2.0,
                text: "First line".to_string(),
                char_start: 0,
                char_end: 10,
                confidence: 0.95,
                words: vec![word("First", 0.0, 0.8, 0, 5), word("line", 0.8, 2.0, 6, 10)],
            },
            TimestampSegment {
                id: 1,
                start_time: 2.0,
                end_time: 5.0,
                text: "Second segment".to_string(),
                char_start: 10,
                char_end: 25,
                confidence: 0.9,
                words: vec![
                    word("Second", 2.0, 3.0, 11, 17),
                    word("segment", 3.0, 5.0, 18, 25),
                ],
            },
        ],
    }
}

/// A second chapter whose single segment is easy to tell apart
pub fn other_chapter() -> ChapterTimestamps {
    ChapterTimestamps {
        version: "1.0".to_string(),
        generated_at: None,
        method: TimestampMethod::Manual,
        language: "en".to_string(),
        duration: 40.0,
        segments: vec![TimestampSegment {
            id: 7,
            start_time: 0.0,
            end_time: 40.0,
            text: "Chapter two".to_string(),
            char_start: 100,
            char_end: 111,
            confidence: 1.0,
            words: Vec::new(),
        }],
    }
}

/// Bundle with `sample_chapter` as chapter 1 and `other_chapter` as chapter 2
pub fn sample_bundle(audiobook_id: &str) -> AudiobookTimestamps {
    let mut chapters = BTreeMap::new();
    chapters.insert(1, sample_chapter());
    chapters.insert(2, other_chapter());
    AudiobookTimestamps {
        audiobook_id: audiobook_id.to_string(),
        book_id: None,
        generated_at: None,
        chapters,
    }
}

enum MockResponse {
    Chapter(ChapterTimestamps),
    NoTimestamps,
    Failure,
}

/// In-memory timestamp endpoint. Unknown chapters answer `NoTimestamps`.
#[derive(Default)]
pub struct MockTimestampClient {
    responses: Mutex<HashMap<ChapterKey, MockResponse>>,
    requests: AtomicUsize,
}

impl MockTimestampClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_chapter(&self, audiobook_id: &str, chapter_number: u32, chapter: ChapterTimestamps) {
        self.responses
            .lock()
            .unwrap()
            .insert(key(audiobook_id, chapter_number), MockResponse::Chapter(chapter));
    }

    pub fn set_no_timestamps(&self, audiobook_id: &str, chapter_number: u32) {
        self.responses
            .lock()
            .unwrap()
            .insert(key(audiobook_id, chapter_number), MockResponse::NoTimestamps);
    }

    /// Answer with a 503 for this chapter
    pub fn set_failure(&self, audiobook_id: &str, chapter_number: u32) {
        self.responses
            .lock()
            .unwrap()
            .insert(key(audiobook_id, chapter_number), MockResponse::Failure);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TimestampClient for MockTimestampClient {
    async fn fetch_chapter(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Result<ChapterFetch, StoreError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self
            .responses
            .lock()
            .unwrap()
            .get(&key(audiobook_id, chapter_number))
        {
            Some(MockResponse::Chapter(chapter)) => Ok(ChapterFetch::Available(chapter.clone())),
            Some(MockResponse::Failure) => Err(StoreError::Status(503)),
            Some(MockResponse::NoTimestamps) | None => Ok(ChapterFetch::NoTimestamps),
        }
    }
}

#[derive(Default)]
struct ResolverState {
    chapters: HashMap<ChapterKey, Arc<ChapterTimestamps>>,
    gates: HashMap<ChapterKey, Arc<Notify>>,
    panics: HashSet<ChapterKey>,
    calls: Vec<ChapterKey>,
}

/// Scriptable resolver for driving the sync service
#[derive(Default)]
pub struct MockTimestampResolver {
    state: Mutex<ResolverState>,
    epoch: AtomicU64,
}

impl MockTimestampResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, audiobook_id: &str, chapter_number: u32, chapter: ChapterTimestamps) {
        self.state
            .lock()
            .unwrap()
            .chapters
            .insert(key(audiobook_id, chapter_number), Arc::new(chapter));
    }

    /// Make resolutions of this chapter wait until the returned gate is notified
    pub fn hold(&self, audiobook_id: &str, chapter_number: u32) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(key(audiobook_id, chapter_number), gate.clone());
        gate
    }

    pub fn panic_on(&self, audiobook_id: &str, chapter_number: u32) {
        self.state
            .lock()
            .unwrap()
            .panics
            .insert(key(audiobook_id, chapter_number));
    }

    /// Every `(audiobook_id, chapter_number)` resolved so far, in order
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Pretend the underlying cache was cleared
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl TimestampResolver for MockTimestampResolver {
    async fn resolve(
        &self,
        audiobook_id: &str,
        chapter_number: u32,
    ) -> Option<Arc<ChapterTimestamps>> {
        let chapter_key = key(audiobook_id, chapter_number);
        let (gate, should_panic) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(chapter_key.clone());
            (
                state.gates.get(&chapter_key).cloned(),
                state.panics.contains(&chapter_key),
            )
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }
        if should_panic {
            panic!("resolver failure for {audiobook_id} chapter {chapter_number}");
        }

        self.state.lock().unwrap().chapters.get(&chapter_key).cloned()
    }

    fn cache_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}
