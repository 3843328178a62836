// Audio-to-text highlight synchronization for audiobooks

pub mod config;
pub mod playback;
pub mod store;
pub mod sync;
pub mod timestamps;

pub use config::Config;
pub use playback::{PlaybackPositionChannel, PlaybackPositionSource, PlaybackProgress};
pub use store::{BundleCache, StoreConfig, StoreError, TimestampResolver, TimestampStore};
pub use sync::{SyncConfig, SyncHandle, SyncPhase, SyncService, SyncSnapshot};
pub use timestamps::{AudiobookTimestamps, ChapterTimestamps, HighlightRange, TimestampSegment};

// Fixtures and test doubles for unit and integration tests
#[doc(hidden)]
pub mod test_support;
