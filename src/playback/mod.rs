mod channel;
pub mod progress;

pub use channel::PlaybackPositionChannel;
pub use progress::{PlaybackProgress, PlaybackProgressHandle};

use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;

/// Where the sync engine reads playback from. The engine never advances
/// playback itself; seeking is the only request it sends back.
pub trait PlaybackPositionSource: Send + Sync {
    /// Position within the current chapter
    fn current_position(&self) -> Duration;

    /// Zero-based index of the chapter being played
    fn current_chapter_index(&self) -> usize;

    /// Stream of position and chapter updates; dropping the receiver unsubscribes
    fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress>;

    fn seek(&self, position: Duration);
}
