//! Position to text lookups.
//!
//! `highlight_at` is the single recompute step used by every update trigger.
//! It is a pure function of the chapter data and the playback time, so applying
//! it twice, or from two triggers in any order, always leaves the state that
//! matches the last time applied.

use super::models::{ChapterTimestamps, HighlightRange, TimestampSegment};

/// Result of one recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HighlightState {
    pub segment_index: Option<usize>,
    pub word_index: Option<usize>,
    pub highlight_range: Option<HighlightRange>,
    pub word_highlight_range: Option<HighlightRange>,
}

impl HighlightState {
    pub fn is_empty(&self) -> bool {
        self.segment_index.is_none()
    }
}

/// Index of the segment with `start_time <= t < end_time`, if any.
///
/// Segments must be sorted by start time and non-overlapping, which decoding
/// guarantees. O(log n).
pub fn segment_index_at(segments: &[TimestampSegment], t: f64) -> Option<usize> {
    let after = segments.partition_point(|s| s.start_time <= t);
    let candidate = after.checked_sub(1)?;
    segments[candidate].contains_time(t).then_some(candidate)
}

/// Index of the word in `segment` with `start_time <= t < end_time`, if any.
/// Word lists are short, so this is a plain scan.
pub fn word_index_at(segment: &TimestampSegment, t: f64) -> Option<usize> {
    segment.words.iter().position(|w| w.contains_time(t))
}

/// Index of the segment whose `[char_start, char_end)` contains `offset`.
/// Char ranges must ascend with segment order, which decoding guarantees.
pub fn segment_index_at_char(segments: &[TimestampSegment], offset: usize) -> Option<usize> {
    let after = segments.partition_point(|s| s.char_start <= offset);
    let candidate = after.checked_sub(1)?;
    segments[candidate]
        .contains_char(offset)
        .then_some(candidate)
}

pub fn segment_at_char(timestamps: &ChapterTimestamps, offset: usize) -> Option<&TimestampSegment> {
    segment_index_at_char(&timestamps.segments, offset).map(|idx| &timestamps.segments[idx])
}

pub fn highlight_at(timestamps: &ChapterTimestamps, t: f64) -> HighlightState {
    let Some(segment_index) = segment_index_at(&timestamps.segments, t) else {
        return HighlightState::default();
    };
    let segment = &timestamps.segments[segment_index];
    let word_index = word_index_at(segment, t);

    HighlightState {
        segment_index: Some(segment_index),
        word_index,
        highlight_range: Some(segment.char_range()),
        word_highlight_range: word_index.map(|idx| segment.words[idx].char_range()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamps::models::WordTimestamp;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn segment(id: u32, start: f64, end: f64, char_start: usize, char_end: usize) -> TimestampSegment {
        TimestampSegment {
            id,
            start_time: start,
            end_time: end,
            text: String::new(),
            char_start,
            char_end,
            confidence: 1.0,
            words: Vec::new(),
        }
    }

    fn word(text: &str, start: f64, end: f64, char_start: usize, char_end: usize) -> WordTimestamp {
        WordTimestamp {
            word: text.to_string(),
            start_time: start,
            end_time: end,
            char_start,
            char_end,
        }
    }

    fn two_segment_chapter() -> ChapterTimestamps {
        ChapterTimestamps {
            segments: vec![segment(0, 0.0, 2.0, 0, 10), segment(1, 2.0, 5.0, 10, 25)],
            ..Default::default()
        }
    }

    fn linear_segment_index(segments: &[TimestampSegment], t: f64) -> Option<usize> {
        segments.iter().position(|s| s.contains_time(t))
    }

    /// Sorted, non-overlapping segments with random gaps between them.
    fn random_segments(rng: &mut StdRng) -> Vec<TimestampSegment> {
        let count = rng.gen_range(0..60);
        let mut t = rng.gen_range(0.0..3.0);
        let mut chars = 0usize;
        let mut segments = Vec::with_capacity(count);
        for id in 0..count {
            if rng.gen_bool(0.3) {
                t += rng.gen_range(0.01..2.0);
                chars += rng.gen_range(0..4);
            }
            let len = rng.gen_range(0.05..4.0);
            let char_len = rng.gen_range(1..80);
            segments.push(segment(id as u32, t, t + len, chars, chars + char_len));
            t += len;
            chars += char_len;
        }
        segments
    }

    #[test]
    fn test_two_segment_scenario() {
        let chapter = two_segment_chapter();

        let state = highlight_at(&chapter, 3.5);
        assert_eq!(state.segment_index, Some(1));
        assert_eq!(state.highlight_range, Some(HighlightRange::new(10, 15)));

        let state = highlight_at(&chapter, 6.0);
        assert!(state.is_empty());
        assert_eq!(state.highlight_range, None);

        let state = highlight_at(&chapter, 1.0);
        assert_eq!(state.segment_index, Some(0));
        assert_eq!(state.highlight_range, Some(HighlightRange::new(0, 10)));
    }

    #[test]
    fn test_boundaries_are_half_open() {
        let chapter = two_segment_chapter();
        assert_eq!(segment_index_at(&chapter.segments, 0.0), Some(0));
        assert_eq!(segment_index_at(&chapter.segments, 2.0 - 1e-9), Some(0));
        assert_eq!(segment_index_at(&chapter.segments, 2.0), Some(1));
        assert_eq!(segment_index_at(&chapter.segments, 5.0), None);
        assert_eq!(segment_index_at(&chapter.segments, -0.1), None);
        assert_eq!(segment_index_at(&chapter.segments, f64::NAN), None);
        assert_eq!(segment_index_at(&[], 1.0), None);
    }

    #[test]
    fn test_gap_between_segments_has_no_highlight() {
        let segments = vec![segment(0, 0.0, 1.0, 0, 5), segment(1, 1.5, 3.0, 7, 12)];
        assert_eq!(segment_index_at(&segments, 1.2), None);
        assert_eq!(segment_index_at(&segments, 1.5), Some(1));
    }

    #[test]
    fn test_binary_search_matches_linear_scan() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let segments = random_segments(&mut rng);
            let mut probes: Vec<f64> = (0..50).map(|_| rng.gen_range(-1.0..200.0)).collect();
            for s in &segments {
                probes.push(s.start_time);
                probes.push(s.end_time);
                probes.push(s.end_time - 1e-9);
            }
            for t in probes {
                assert_eq!(
                    segment_index_at(&segments, t),
                    linear_segment_index(&segments, t),
                    "mismatch at t={t}"
                );
            }
        }
    }

    #[test]
    fn test_every_time_inside_segment_finds_it() {
        let mut rng = StdRng::seed_from_u64(42);
        let segments = random_segments(&mut rng);
        for (idx, s) in segments.iter().enumerate() {
            for step in 0..10 {
                let t = s.start_time + s.duration() * (step as f64 / 10.0);
                assert_eq!(segment_index_at(&segments, t), Some(idx));
            }
        }
    }

    #[test]
    fn test_word_lookup_stays_within_active_segment() {
        let mut first = segment(0, 0.0, 2.0, 0, 10);
        first.words = vec![word("First", 0.0, 0.8, 0, 5), word("one.", 1.0, 2.0, 6, 10)];
        let mut second = segment(1, 2.0, 5.0, 10, 25);
        second.words = vec![word("Second", 2.0, 3.0, 10, 16)];
        let chapter = ChapterTimestamps {
            segments: vec![first, second],
            ..Default::default()
        };

        let state = highlight_at(&chapter, 0.5);
        assert_eq!(state.word_index, Some(0));
        assert_eq!(state.word_highlight_range, Some(HighlightRange::new(0, 5)));

        // pause between words
        let state = highlight_at(&chapter, 0.9);
        assert_eq!(state.segment_index, Some(0));
        assert_eq!(state.word_highlight_range, None);

        let state = highlight_at(&chapter, 4.0);
        assert_eq!(state.segment_index, Some(1));
        assert_eq!(state.word_index, None);

        let state = highlight_at(&chapter, 7.0);
        assert_eq!(state.word_highlight_range, None);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let chapter = two_segment_chapter();
        assert_eq!(highlight_at(&chapter, 3.0), highlight_at(&chapter, 3.0));
    }

    #[test]
    fn test_char_lookup() {
        let segments = vec![
            segment(0, 0.0, 2.0, 0, 10),
            segment(1, 2.0, 5.0, 10, 25),
            segment(2, 5.0, 6.0, 30, 40),
        ];
        assert_eq!(segment_index_at_char(&segments, 0), Some(0));
        assert_eq!(segment_index_at_char(&segments, 9), Some(0));
        assert_eq!(segment_index_at_char(&segments, 12), Some(1));
        assert_eq!(segment_index_at_char(&segments, 27), None);
        assert_eq!(segment_index_at_char(&segments, 39), Some(2));
        assert_eq!(segment_index_at_char(&segments, 40), None);
    }
}
