use std::sync::Arc;

use crate::timestamps::lookup::segment_at_char;
use crate::timestamps::{ChapterTimestamps, HighlightRange, TimestampSegment, WordTimestamp};

/// Lifecycle of one sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No target chapter
    #[default]
    Idle,
    /// Timestamp resolution in flight
    Loading,
    /// Timestamps present, following playback
    Active,
    /// Resolution finished without data; no highlights for this chapter
    Unavailable,
}

/// Everything the rendering layer needs, published after every change.
///
/// Ranges are offsets into the chapter's plain text; consumers should clamp
/// them with `HighlightRange::clamped` against the text they actually show.
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub audiobook_id: Option<String>,
    pub chapter_number: Option<u32>,
    pub current_segment: Option<TimestampSegment>,
    pub current_word: Option<WordTimestamp>,
    pub highlight_range: Option<HighlightRange>,
    pub word_highlight_range: Option<HighlightRange>,
    pub is_active: bool,
    pub has_timestamps: bool,
    pub is_loading: bool,
    /// Diagnostic only
    pub error: Option<String>,
    pub(crate) timestamps: Option<Arc<ChapterTimestamps>>,
}

impl SyncSnapshot {
    pub fn timestamps(&self) -> Option<&ChapterTimestamps> {
        self.timestamps.as_deref()
    }

    /// Segment covering `char_offset` in the synced chapter
    pub fn segment_at(&self, char_offset: usize) -> Option<&TimestampSegment> {
        segment_at_char(self.timestamps()?, char_offset)
    }

    /// True when nothing is highlighted and no chapter is targeted
    pub fn is_cleared(&self) -> bool {
        self.phase == SyncPhase::Idle
            && self.audiobook_id.is_none()
            && self.chapter_number.is_none()
            && self.current_segment.is_none()
            && self.current_word.is_none()
            && self.highlight_range.is_none()
            && self.word_highlight_range.is_none()
            && !self.is_active
            && !self.has_timestamps
            && !self.is_loading
            && self.error.is_none()
            && self.timestamps.is_none()
    }
}
