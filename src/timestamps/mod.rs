pub(crate) mod decode;
pub mod lookup;
pub mod models;

pub use lookup::{highlight_at, segment_at_char, HighlightState};
pub use models::{
    AudiobookTimestamps, ChapterTimestamps, HighlightRange, TimestampMethod, TimestampSegment,
    WordTimestamp,
};
