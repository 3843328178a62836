use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::{SyncPhase, SyncSnapshot};
use crate::timestamps::lookup::{highlight_at, segment_at_char, HighlightState};
use crate::timestamps::{ChapterTimestamps, TimestampSegment};

/// How a timestamp resolution ended
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(Option<Arc<ChapterTimestamps>>),
    Failed(String),
}

/// Synchronization state machine.
///
/// Owns the live highlight state and nothing asynchronous: the service task
/// drives it and performs the actual resolution and subscriptions. Each
/// `begin` or `stop` starts a new generation; a resolution reporting back with
/// an older generation is discarded.
#[derive(Debug, Default)]
pub struct SyncEngine {
    phase: SyncPhase,
    audiobook_id: Option<String>,
    chapter_number: Option<u32>,
    generation: u64,
    timestamps: Option<Arc<ChapterTimestamps>>,
    highlight: HighlightState,
    resolved_epoch: u64,
    error: Option<String>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn audiobook_id(&self) -> Option<&str> {
        self.audiobook_id.as_deref()
    }

    pub fn chapter_number(&self) -> Option<u32> {
        self.chapter_number
    }

    pub fn highlight(&self) -> &HighlightState {
        &self.highlight
    }

    pub fn is_target(&self, audiobook_id: &str, chapter_number: u32) -> bool {
        self.audiobook_id.as_deref() == Some(audiobook_id)
            && self.chapter_number == Some(chapter_number)
    }

    /// Enter `Loading` for a new target, dropping all state of the previous
    /// one. Returns the generation the resolution has to report back with.
    pub fn begin(&mut self, audiobook_id: &str, chapter_number: u32, cache_epoch: u64) -> u64 {
        self.generation += 1;
        self.phase = SyncPhase::Loading;
        self.audiobook_id = Some(audiobook_id.to_string());
        self.chapter_number = Some(chapter_number);
        self.timestamps = None;
        self.highlight = HighlightState::default();
        self.resolved_epoch = cache_epoch;
        self.error = None;
        debug!(
            %audiobook_id,
            chapter_number,
            generation = self.generation,
            "Resolving chapter timestamps"
        );
        self.generation
    }

    /// Apply a finished resolution. Returns false when it was superseded.
    pub fn complete(&mut self, generation: u64, resolution: Resolution) -> bool {
        if generation != self.generation || self.phase != SyncPhase::Loading {
            debug!(
                generation,
                current = self.generation,
                "Discarding superseded timestamp resolution"
            );
            return false;
        }

        match resolution {
            Resolution::Resolved(Some(timestamps)) if !timestamps.is_empty() => {
                info!(
                    audiobook_id = ?self.audiobook_id,
                    chapter_number = ?self.chapter_number,
                    segments = timestamps.segments.len(),
                    "Chapter timestamps available"
                );
                self.timestamps = Some(timestamps);
                self.phase = SyncPhase::Active;
            }
            Resolution::Resolved(_) => {
                info!(
                    audiobook_id = ?self.audiobook_id,
                    chapter_number = ?self.chapter_number,
                    "No timestamps for chapter"
                );
                self.phase = SyncPhase::Unavailable;
            }
            Resolution::Failed(reason) => {
                warn!(
                    audiobook_id = ?self.audiobook_id,
                    chapter_number = ?self.chapter_number,
                    "Timestamp resolution failed: {}",
                    reason
                );
                self.error = Some(reason);
                self.phase = SyncPhase::Unavailable;
            }
        }
        true
    }

    /// Recompute the highlight for playback time `position` (seconds).
    /// Returns true when the highlight changed.
    pub fn update(&mut self, position: f64) -> bool {
        let Some(timestamps) = &self.timestamps else {
            return false;
        };
        let next = highlight_at(timestamps, position);
        if next == self.highlight {
            return false;
        }
        self.highlight = next;
        true
    }

    pub fn segment_at(&self, char_offset: usize) -> Option<&TimestampSegment> {
        segment_at_char(self.timestamps.as_deref()?, char_offset)
    }

    /// Playback time to seek to for a tap at `char_offset`
    pub fn seek_target(&self, char_offset: usize) -> Option<f64> {
        self.segment_at(char_offset).map(|segment| segment.start_time)
    }

    /// Whether the data in use may have been dropped from the store's cache
    pub fn needs_refresh(&self, cache_epoch: u64) -> bool {
        self.phase == SyncPhase::Active && cache_epoch != self.resolved_epoch
    }

    /// Back to `Idle`; any resolution still in flight becomes stale
    pub fn stop(&mut self) {
        self.generation += 1;
        self.phase = SyncPhase::Idle;
        self.audiobook_id = None;
        self.chapter_number = None;
        self.timestamps = None;
        self.highlight = HighlightState::default();
        self.error = None;
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let current_segment = self
            .highlight
            .segment_index
            .zip(self.timestamps.as_ref())
            .map(|(idx, timestamps)| &timestamps.segments[idx]);
        let current_word = current_segment
            .zip(self.highlight.word_index)
            .map(|(segment, idx)| segment.words[idx].clone());

        SyncSnapshot {
            phase: self.phase,
            audiobook_id: self.audiobook_id.clone(),
            chapter_number: self.chapter_number,
            current_segment: current_segment.cloned(),
            current_word,
            highlight_range: self.highlight.highlight_range,
            word_highlight_range: self.highlight.word_highlight_range,
            is_active: self.phase == SyncPhase::Active,
            has_timestamps: self.timestamps.is_some(),
            is_loading: self.phase == SyncPhase::Loading,
            error: self.error.clone(),
            timestamps: self.timestamps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_chapter;
    use crate::timestamps::HighlightRange;

    fn active_engine() -> SyncEngine {
        let mut engine = SyncEngine::new();
        let generation = engine.begin("ab-1", 1, 0);
        assert!(engine.complete(
            generation,
            Resolution::Resolved(Some(Arc::new(sample_chapter())))
        ));
        engine
    }

    #[test]
    fn test_begin_enters_loading() {
        let mut engine = SyncEngine::new();
        engine.begin("ab-1", 3, 0);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, SyncPhase::Loading);
        assert!(snapshot.is_loading);
        assert!(!snapshot.is_active);
        assert!(!snapshot.has_timestamps);
        assert_eq!(snapshot.chapter_number, Some(3));
    }

    #[test]
    fn test_resolution_with_data_activates() {
        let mut engine = active_engine();
        assert_eq!(engine.phase(), SyncPhase::Active);

        assert!(engine.update(3.5));
        let snapshot = engine.snapshot();
        assert!(snapshot.is_active);
        assert!(snapshot.has_timestamps);
        assert_eq!(snapshot.current_segment.as_ref().map(|s| s.id), Some(1));
        assert_eq!(snapshot.highlight_range, Some(HighlightRange::new(10, 15)));
    }

    #[test]
    fn test_missing_or_empty_data_is_unavailable() {
        let mut engine = SyncEngine::new();
        let generation = engine.begin("ab-1", 1, 0);
        assert!(engine.complete(generation, Resolution::Resolved(None)));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, SyncPhase::Unavailable);
        assert!(!snapshot.is_active);
        assert!(!snapshot.has_timestamps);
        assert!(!snapshot.is_loading);
        assert!(!engine.update(1.0));

        let generation = engine.begin("ab-1", 2, 0);
        engine.complete(
            generation,
            Resolution::Resolved(Some(Arc::new(ChapterTimestamps::default()))),
        );
        assert_eq!(engine.phase(), SyncPhase::Unavailable);
    }

    #[test]
    fn test_failure_keeps_diagnostic() {
        let mut engine = SyncEngine::new();
        let generation = engine.begin("ab-1", 1, 0);
        engine.complete(generation, Resolution::Failed("boom".to_string()));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, SyncPhase::Unavailable);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_stale_resolution_is_discarded() {
        let mut engine = SyncEngine::new();
        let old = engine.begin("ab-1", 1, 0);
        let new = engine.begin("ab-1", 2, 0);

        let mut other = sample_chapter();
        other.segments.truncate(1);
        assert!(!engine.complete(old, Resolution::Resolved(Some(Arc::new(other)))));
        assert_eq!(engine.phase(), SyncPhase::Loading);

        assert!(engine.complete(new, Resolution::Resolved(None)));
        assert_eq!(engine.phase(), SyncPhase::Unavailable);
        assert_eq!(engine.chapter_number(), Some(2));

        // A duplicate completion for the current generation changes nothing
        assert!(!engine.complete(
            new,
            Resolution::Resolved(Some(Arc::new(sample_chapter())))
        ));
        assert_eq!(engine.phase(), SyncPhase::Unavailable);
    }

    #[test]
    fn test_stop_clears_and_invalidates() {
        let mut engine = SyncEngine::new();
        let generation = engine.begin("ab-1", 1, 0);
        engine.stop();
        assert!(!engine.complete(
            generation,
            Resolution::Resolved(Some(Arc::new(sample_chapter())))
        ));
        assert!(engine.snapshot().is_cleared());

        let mut engine = active_engine();
        engine.update(1.0);
        engine.stop();
        assert!(engine.snapshot().is_cleared());
        assert!(!engine.update(1.0));
        assert!(engine.snapshot().is_cleared());

        // Stopping an idle engine is harmless
        engine.stop();
        assert!(engine.snapshot().is_cleared());
    }

    #[test]
    fn test_update_reports_changes_only() {
        let mut engine = active_engine();
        assert!(engine.update(0.1));
        assert!(!engine.update(0.1));
        assert!(engine.update(6.0));
        assert_eq!(engine.snapshot().highlight_range, None);
        assert!(!engine.update(7.0));
    }

    #[test]
    fn test_word_in_snapshot() {
        let mut engine = active_engine();
        engine.update(0.2);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.current_word.as_ref().map(|w| w.word.as_str()), Some("First"));
        assert_eq!(snapshot.word_highlight_range, Some(HighlightRange::new(0, 5)));
    }

    #[test]
    fn test_seek_target_and_segment_lookup() {
        let engine = active_engine();
        assert_eq!(engine.seek_target(12), Some(2.0));
        assert_eq!(engine.seek_target(3), Some(0.0));
        assert_eq!(engine.seek_target(500), None);
        assert_eq!(engine.segment_at(12).map(|s| s.id), Some(1));

        let idle = SyncEngine::new();
        assert_eq!(idle.seek_target(12), None);
    }

    #[test]
    fn test_needs_refresh_after_epoch_change() {
        let engine = active_engine();
        assert!(!engine.needs_refresh(0));
        assert!(engine.needs_refresh(1));

        let mut loading = SyncEngine::new();
        loading.begin("ab-1", 1, 0);
        assert!(!loading.needs_refresh(1));
    }
}
