pub mod handle;

pub use handle::PlaybackProgressHandle;
use std::time::Duration;

/// Progress updates reported by the audio engine
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackProgress {
    /// Position within the current chapter
    PositionUpdate {
        position: Duration,
        chapter_index: usize,
    },
    /// Playback moved to another chapter; position restarts at zero
    ChapterChanged { chapter_index: usize },
}
