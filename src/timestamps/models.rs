use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::decode;

/// How a chapter's timestamps were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMethod {
    #[serde(alias = "whisper", alias = "transcription", alias = "asr")]
    Automated,
    Manual,
    #[serde(alias = "publisher_provided")]
    Publisher,
    #[default]
    Unknown,
}

/// A single narrated word and its span in the chapter text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTimestamp {
    #[serde(default, deserialize_with = "decode::lenient_string")]
    pub word: String,
    #[serde(default, deserialize_with = "decode::lenient_f64")]
    pub start_time: f64,
    #[serde(default, deserialize_with = "decode::lenient_f64")]
    pub end_time: f64,
    #[serde(default, deserialize_with = "decode::lenient_usize")]
    pub char_start: usize,
    #[serde(default, deserialize_with = "decode::lenient_usize")]
    pub char_end: usize,
}

impl WordTimestamp {
    /// Half-open: `start_time <= t < end_time`
    pub fn contains_time(&self, t: f64) -> bool {
        self.start_time <= t && t < self.end_time
    }

    pub fn char_range(&self) -> HighlightRange {
        HighlightRange::between(self.char_start, self.char_end)
    }
}

/// A sentence or phrase with its narration window and text span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampSegment {
    #[serde(default, deserialize_with = "decode::lenient_u32")]
    pub id: u32,
    #[serde(default, deserialize_with = "decode::lenient_f64")]
    pub start_time: f64,
    #[serde(default, deserialize_with = "decode::lenient_f64")]
    pub end_time: f64,
    #[serde(default, deserialize_with = "decode::lenient_string")]
    pub text: String,
    #[serde(default, deserialize_with = "decode::lenient_usize")]
    pub char_start: usize,
    #[serde(default, deserialize_with = "decode::lenient_usize")]
    pub char_end: usize,
    #[serde(default, deserialize_with = "decode::lenient_f64")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "decode::lenient_vec")]
    pub words: Vec<WordTimestamp>,
}

impl TimestampSegment {
    /// Half-open: `start_time <= t < end_time`
    pub fn contains_time(&self, t: f64) -> bool {
        self.start_time <= t && t < self.end_time
    }

    /// Half-open: `char_start <= offset < char_end`
    pub fn contains_char(&self, offset: usize) -> bool {
        self.char_start <= offset && offset < self.char_end
    }

    pub fn char_range(&self) -> HighlightRange {
        HighlightRange::between(self.char_start, self.char_end)
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    fn has_valid_ranges(&self) -> bool {
        self.start_time.is_finite()
            && self.end_time.is_finite()
            && self.start_time < self.end_time
            && self.char_start < self.char_end
    }
}

/// Timestamp data for one chapter. Segments are sorted by start time and do
/// not overlap, in time or in text; char ranges ascend in the same order and
/// may leave gaps in the chapter text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterTimestamps {
    #[serde(default, deserialize_with = "decode::lenient_string")]
    pub version: String,
    #[serde(default, deserialize_with = "decode::default_on_error")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "decode::default_on_error")]
    pub method: TimestampMethod,
    #[serde(default, deserialize_with = "decode::lenient_string")]
    pub language: String,
    #[serde(default, deserialize_with = "decode::lenient_f64")]
    pub duration: f64,
    #[serde(default, deserialize_with = "decode::segments")]
    pub segments: Vec<TimestampSegment>,
}

impl ChapterTimestamps {
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment_by_id(&self, id: u32) -> Option<&TimestampSegment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn word_count(&self) -> usize {
        self.segments.iter().map(|s| s.words.len()).sum()
    }
}

/// Offline bundle: every chapter of one audiobook
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudiobookTimestamps {
    #[serde(default, deserialize_with = "decode::lenient_string")]
    pub audiobook_id: String,
    #[serde(
        default,
        deserialize_with = "decode::default_on_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub book_id: Option<String>,
    #[serde(default, deserialize_with = "decode::default_on_error")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "decode::chapters")]
    pub chapters: BTreeMap<u32, ChapterTimestamps>,
}

impl AudiobookTimestamps {
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn chapter(&self, chapter_number: u32) -> Option<&ChapterTimestamps> {
        self.chapters.get(&chapter_number)
    }
}

/// Character span in chapter text: `location` plus `length`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HighlightRange {
    pub location: usize,
    pub length: usize,
}

impl HighlightRange {
    pub fn new(location: usize, length: usize) -> Self {
        Self { location, length }
    }

    pub fn between(start: usize, end: usize) -> Self {
        Self {
            location: start,
            length: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> usize {
        self.location.saturating_add(self.length)
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.location <= offset && offset < self.end()
    }

    /// Clamp to a text of `text_len` characters. `None` when nothing of the
    /// range is left.
    pub fn clamped(&self, text_len: usize) -> Option<HighlightRange> {
        if self.location >= text_len {
            return None;
        }
        let end = self.end().min(text_len);
        Some(HighlightRange::between(self.location, end)).filter(|r| r.length > 0)
    }
}

pub(crate) fn sanitize_segments(mut segments: Vec<TimestampSegment>) -> Vec<TimestampSegment> {
    let total = segments.len();
    segments.retain(TimestampSegment::has_valid_ranges);
    segments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut kept: Vec<TimestampSegment> = Vec::with_capacity(segments.len());
    for mut segment in segments {
        // Time and text must both advance
        if kept.last().is_some_and(|prev| {
            segment.start_time < prev.end_time || segment.char_start < prev.char_end
        }) {
            continue;
        }
        segment.confidence = segment.confidence.clamp(0.0, 1.0);
        let words = std::mem::take(&mut segment.words);
        segment.words = sanitize_words(words, &segment);
        kept.push(segment);
    }

    if kept.len() != total {
        debug!(
            dropped = total - kept.len(),
            total, "Dropped invalid, overlapping or out of order timestamp segments"
        );
    }
    kept
}

fn sanitize_words(mut words: Vec<WordTimestamp>, segment: &TimestampSegment) -> Vec<WordTimestamp> {
    words.retain(|w| {
        w.start_time < w.end_time
            && w.char_start < w.char_end
            && w.start_time >= segment.start_time
            && w.end_time <= segment.end_time
            && w.char_start >= segment.char_start
            && w.char_end <= segment.char_end
    });
    words.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut kept: Vec<WordTimestamp> = Vec::with_capacity(words.len());
    for word in words {
        if kept.last().is_some_and(|prev| word.start_time < prev.end_time) {
            continue;
        }
        kept.push(word);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER_JSON: &str = r#"{
        "version": "1.0",
        "generatedAt": "2024-03-01T12:00:00Z",
        "method": "whisper",
        "language": "en",
        "duration": 5.0,
        "segments": [
            {"id": 1, "startTime": 2.0, "endTime": 5.0, "text": "Second sentence.",
             "charStart": 10, "charEnd": 25, "confidence": 0.9, "words": []},
            {"id": 0, "startTime": 0.0, "endTime": 2.0, "text": "First one.",
             "charStart": 0, "charEnd": 10, "confidence": 0.95,
             "words": [
                {"word": "one.", "startTime": 0.8, "endTime": 2.0, "charStart": 6, "charEnd": 10},
                {"word": "First", "startTime": 0.0, "endTime": 0.8, "charStart": 0, "charEnd": 5}
             ]}
        ]
    }"#;

    #[test]
    fn test_decode_chapter_sorts_segments_and_words() {
        let chapter = ChapterTimestamps::from_json(CHAPTER_JSON.as_bytes()).unwrap();
        assert_eq!(chapter.method, TimestampMethod::Automated);
        assert_eq!(chapter.language, "en");
        assert!(chapter.generated_at.is_some());
        let ids: Vec<u32> = chapter.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1]);
        let words: Vec<&str> = chapter.segments[0]
            .words
            .iter()
            .map(|w| w.word.as_str())
            .collect();
        assert_eq!(words, vec!["First", "one."]);
    }

    #[test]
    fn test_decode_tolerates_bad_fields() {
        let json = r#"{
            "version": 2,
            "generatedAt": "yesterday",
            "method": "dictation",
            "duration": "12.5",
            "segments": [
                {"id": "0", "startTime": "0", "endTime": 1.5, "charStart": 0, "charEnd": 4,
                 "confidence": 7, "words": "not a list"},
                "garbage",
                {"id": 1, "startTime": 3.0, "endTime": 2.0, "charStart": 4, "charEnd": 9}
            ]
        }"#;
        let chapter = ChapterTimestamps::from_json(json.as_bytes()).unwrap();
        assert_eq!(chapter.version, "2");
        assert_eq!(chapter.generated_at, None);
        assert_eq!(chapter.method, TimestampMethod::Unknown);
        assert_eq!(chapter.duration, 12.5);
        assert_eq!(chapter.segments.len(), 1);
        assert_eq!(chapter.segments[0].confidence, 1.0);
        assert!(chapter.segments[0].words.is_empty());
    }

    #[test]
    fn test_overlapping_segments_keep_earliest() {
        let json = r#"{"segments": [
            {"id": 0, "startTime": 0.0, "endTime": 3.0, "charStart": 0, "charEnd": 5},
            {"id": 1, "startTime": 2.0, "endTime": 4.0, "charStart": 5, "charEnd": 9},
            {"id": 2, "startTime": 4.0, "endTime": 6.0, "charStart": 9, "charEnd": 12}
        ]}"#;
        let chapter = ChapterTimestamps::from_json(json.as_bytes()).unwrap();
        let ids: Vec<u32> = chapter.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_segments_out_of_text_order_are_dropped() {
        let json = r#"{"segments": [
            {"id": 0, "startTime": 0.0, "endTime": 1.0, "charStart": 10, "charEnd": 20},
            {"id": 1, "startTime": 1.0, "endTime": 2.0, "charStart": 0, "charEnd": 10},
            {"id": 2, "startTime": 2.0, "endTime": 3.0, "charStart": 20, "charEnd": 30},
            {"id": 3, "startTime": 3.0, "endTime": 4.0, "charStart": 25, "charEnd": 35}
        ]}"#;
        let chapter = ChapterTimestamps::from_json(json.as_bytes()).unwrap();
        let ids: Vec<u32> = chapter.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 2]);

        // Every remaining segment is reachable from its own text
        for offset in 0..40 {
            let linear = chapter.segments.iter().find(|s| s.contains_char(offset));
            let found = crate::timestamps::segment_at_char(&chapter, offset);
            assert_eq!(found.map(|s| s.id), linear.map(|s| s.id), "offset {offset}");
        }
        assert_eq!(crate::timestamps::segment_at_char(&chapter, 15).map(|s| s.id), Some(0));
    }

    #[test]
    fn test_words_outside_segment_are_dropped() {
        let json = r#"{"segments": [
            {"id": 0, "startTime": 1.0, "endTime": 3.0, "charStart": 10, "charEnd": 20,
             "words": [
                {"word": "early", "startTime": 0.5, "endTime": 1.2, "charStart": 10, "charEnd": 14},
                {"word": "ok", "startTime": 1.2, "endTime": 2.0, "charStart": 10, "charEnd": 12},
                {"word": "wide", "startTime": 2.0, "endTime": 2.5, "charStart": 18, "charEnd": 24}
             ]}
        ]}"#;
        let chapter = ChapterTimestamps::from_json(json.as_bytes()).unwrap();
        let words: Vec<&str> = chapter.segments[0]
            .words
            .iter()
            .map(|w| w.word.as_str())
            .collect();
        assert_eq!(words, vec!["ok"]);
    }

    #[test]
    fn test_bundle_chapter_keys() {
        let json = format!(
            r#"{{"audiobookId": "ab-1", "bookId": null, "chapters": {{"1": {CHAPTER_JSON}, "intro": {{}}, " 3 ": {{}}}}}}"#
        );
        let bundle = AudiobookTimestamps::from_json(json.as_bytes()).unwrap();
        assert_eq!(bundle.audiobook_id, "ab-1");
        assert_eq!(bundle.book_id, None);
        assert_eq!(bundle.chapters.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(bundle.chapter(1).unwrap().segments.len(), 2);
        assert!(bundle.chapter(3).unwrap().is_empty());
    }

    #[test]
    fn test_bundle_serializes_back_to_wire_names() {
        let bundle = AudiobookTimestamps {
            audiobook_id: "ab-1".to_string(),
            book_id: Some("book-9".to_string()),
            generated_at: None,
            chapters: BTreeMap::from([(
                2,
                ChapterTimestamps::from_json(CHAPTER_JSON.as_bytes()).unwrap(),
            )]),
        };
        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["audiobookId"], "ab-1");
        assert_eq!(value["bookId"], "book-9");
        assert_eq!(value["chapters"]["2"]["segments"][1]["charStart"], 10);
        assert_eq!(value["chapters"]["2"]["method"], "automated");
    }

    #[test]
    fn test_highlight_range_clamp() {
        let range = HighlightRange::new(10, 15);
        assert_eq!(range.end(), 25);
        assert!(range.contains(24));
        assert!(!range.contains(25));
        assert_eq!(range.clamped(100), Some(range));
        assert_eq!(range.clamped(20), Some(HighlightRange::new(10, 10)));
        assert_eq!(range.clamped(10), None);
        assert_eq!(HighlightRange::new(3, 0).clamped(10), None);
    }
}
