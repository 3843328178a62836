use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::debug;

use super::progress::{PlaybackProgress, PlaybackProgressHandle};
use super::PlaybackPositionSource;

#[derive(Debug, Default)]
struct PositionState {
    position: Duration,
    chapter_index: usize,
}

/// Position source driven by an audio engine.
///
/// The engine reports positions and chapter changes; the sync side reads and
/// subscribes through `PlaybackPositionSource`. Seek requests come back to the
/// engine on the receiver returned by `new`.
#[derive(Clone)]
pub struct PlaybackPositionChannel {
    state: Arc<Mutex<PositionState>>,
    progress_tx: tokio_mpsc::UnboundedSender<PlaybackProgress>,
    progress_handle: PlaybackProgressHandle,
    seek_tx: tokio_mpsc::UnboundedSender<Duration>,
}

impl PlaybackPositionChannel {
    pub fn new(
        runtime_handle: tokio::runtime::Handle,
    ) -> (Self, tokio_mpsc::UnboundedReceiver<Duration>) {
        let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();
        let (seek_tx, seek_rx) = tokio_mpsc::unbounded_channel();
        let progress_handle = PlaybackProgressHandle::new(progress_rx, runtime_handle);

        let channel = Self {
            state: Arc::new(Mutex::new(PositionState::default())),
            progress_tx,
            progress_handle,
            seek_tx,
        };
        (channel, seek_rx)
    }

    /// Update the position and notify subscribers
    pub fn report_position(&self, position: Duration) {
        let chapter_index = {
            let mut state = self.state.lock().unwrap();
            state.position = position;
            state.chapter_index
        };
        let _ = self.progress_tx.send(PlaybackProgress::PositionUpdate {
            position,
            chapter_index,
        });
    }

    /// Switch chapters; the position restarts at zero
    pub fn report_chapter(&self, chapter_index: usize) {
        {
            let mut state = self.state.lock().unwrap();
            state.chapter_index = chapter_index;
            state.position = Duration::ZERO;
        }
        debug!(chapter_index, "Playback chapter changed");
        let _ = self
            .progress_tx
            .send(PlaybackProgress::ChapterChanged { chapter_index });
    }

    /// Update the pollable position without notifying subscribers, for engines
    /// that only expose a clock
    pub fn set_position(&self, position: Duration) {
        self.state.lock().unwrap().position = position;
    }

    pub fn subscriber_count(&self) -> usize {
        self.progress_handle.subscriber_count()
    }
}

impl PlaybackPositionSource for PlaybackPositionChannel {
    fn current_position(&self) -> Duration {
        self.state.lock().unwrap().position
    }

    fn current_chapter_index(&self) -> usize {
        self.state.lock().unwrap().chapter_index
    }

    fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress> {
        self.progress_handle.subscribe_all()
    }

    fn seek(&self, position: Duration) {
        // Reflect the target right away so polling does not read the old position
        self.state.lock().unwrap().position = position;
        if self.seek_tx.send(position).is_err() {
            debug!("Seek requested but no audio engine is listening");
        }
    }
}
