use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::{Resolution, SyncEngine};
use super::state::{SyncPhase, SyncSnapshot};
use super::SyncConfig;
use crate::playback::{PlaybackPositionSource, PlaybackProgress};
use crate::store::TimestampResolver;
use crate::timestamps::TimestampSegment;

/// Commands sent to the sync service
#[derive(Debug, Clone)]
pub enum SyncCommand {
    Start {
        audiobook_id: String,
        chapter_number: u32,
    },
    Stop,
    SeekToText {
        char_offset: usize,
    },
}

struct ResolutionDone {
    generation: u64,
    resolution: Resolution,
}

/// Handle to a running sync service
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: tokio_mpsc::UnboundedSender<SyncCommand>,
    state_rx: watch::Receiver<SyncSnapshot>,
}

impl SyncHandle {
    /// Start following `chapter_number` of an audiobook, superseding whatever
    /// was being followed before
    pub fn start_sync(&self, audiobook_id: impl Into<String>, chapter_number: u32) {
        let _ = self.command_tx.send(SyncCommand::Start {
            audiobook_id: audiobook_id.into(),
            chapter_number,
        });
    }

    pub fn stop_sync(&self) {
        let _ = self.command_tx.send(SyncCommand::Stop);
    }

    /// Seek playback to the segment under `char_offset` (tap-to-seek)
    pub fn seek_to_text(&self, char_offset: usize) {
        let _ = self.command_tx.send(SyncCommand::SeekToText { char_offset });
    }

    /// Segment under `char_offset` in the synced chapter, without seeking
    pub fn get_segment(&self, char_offset: usize) -> Option<TimestampSegment> {
        self.state_rx.borrow().segment_at(char_offset).cloned()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Receiver that always holds the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.state_rx.clone()
    }
}

/// Service task that owns a `SyncEngine`.
///
/// All engine state is mutated on this one task. Resolution runs in a
/// separate task and reports back through a channel; position updates arrive
/// from the source subscription and from the poll interval, and both go
/// through the same recompute.
pub struct SyncService {
    resolver: Arc<dyn TimestampResolver>,
    source: Arc<dyn PlaybackPositionSource>,
    config: SyncConfig,
    engine: SyncEngine,
    command_rx: tokio_mpsc::UnboundedReceiver<SyncCommand>,
    state_tx: watch::Sender<SyncSnapshot>,
    resolution_tx: tokio_mpsc::UnboundedSender<ResolutionDone>,
    resolution_rx: tokio_mpsc::UnboundedReceiver<ResolutionDone>,
    resolution_task: Option<JoinHandle<()>>,
    progress_rx: Option<tokio_mpsc::UnboundedReceiver<PlaybackProgress>>,
    poll: Option<Interval>,
    observed_chapter_index: Option<usize>,
}

impl SyncService {
    pub fn start(
        resolver: Arc<dyn TimestampResolver>,
        source: Arc<dyn PlaybackPositionSource>,
        config: SyncConfig,
        runtime_handle: tokio::runtime::Handle,
    ) -> SyncHandle {
        let (command_tx, command_rx) = tokio_mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SyncSnapshot::default());
        let (resolution_tx, resolution_rx) = tokio_mpsc::unbounded_channel();

        let service = SyncService {
            resolver,
            source,
            config,
            engine: SyncEngine::new(),
            command_rx,
            state_tx,
            resolution_tx,
            resolution_rx,
            resolution_task: None,
            progress_rx: None,
            poll: None,
            observed_chapter_index: None,
        };
        runtime_handle.spawn(service.run());

        SyncHandle {
            command_tx,
            state_rx,
        }
    }

    async fn run(mut self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "SyncService started"
        );

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(done) = self.resolution_rx.recv() => self.on_resolution(done),
                progress = next_progress(&mut self.progress_rx) => self.on_progress(progress),
                _ = next_tick(&mut self.poll) => self.on_poll(),
            }
        }

        self.teardown();
        info!("SyncService stopped");
    }

    fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Start {
                audiobook_id,
                chapter_number,
            } => {
                let in_progress = matches!(
                    self.engine.phase(),
                    SyncPhase::Loading | SyncPhase::Active
                );
                if in_progress && self.engine.is_target(&audiobook_id, chapter_number) {
                    debug!(%audiobook_id, chapter_number, "Already syncing chapter");
                    return;
                }
                let chapter_index = self.source.current_chapter_index();
                self.restart(audiobook_id, chapter_number, chapter_index);
            }
            SyncCommand::Stop => self.stop(),
            SyncCommand::SeekToText { char_offset } => self.seek_to_text(char_offset),
        }
    }

    /// Tear down the previous target's subscription, timer and resolution,
    /// then resolve the new one
    fn restart(&mut self, audiobook_id: String, chapter_number: u32, chapter_index: usize) {
        self.teardown();

        let generation =
            self.engine
                .begin(&audiobook_id, chapter_number, self.resolver.cache_epoch());
        self.observed_chapter_index = Some(chapter_index);
        self.progress_rx = Some(self.source.subscribe());
        self.publish();

        let resolver = self.resolver.clone();
        let resolution_tx = self.resolution_tx.clone();
        self.resolution_task = Some(tokio::spawn(async move {
            let resolution = match AssertUnwindSafe(resolver.resolve(&audiobook_id, chapter_number))
                .catch_unwind()
                .await
            {
                Ok(timestamps) => Resolution::Resolved(timestamps),
                Err(_) => Resolution::Failed("timestamp resolution panicked".to_string()),
            };
            let _ = resolution_tx.send(ResolutionDone {
                generation,
                resolution,
            });
        }));
    }

    fn stop(&mut self) {
        info!(
            audiobook_id = ?self.engine.audiobook_id(),
            chapter_number = ?self.engine.chapter_number(),
            "Stopping highlight sync"
        );
        self.teardown();
        self.engine.stop();
        self.observed_chapter_index = None;
        self.publish();
    }

    fn teardown(&mut self) {
        if let Some(task) = self.resolution_task.take() {
            task.abort();
        }
        self.progress_rx = None;
        self.poll = None;
    }

    fn on_resolution(&mut self, done: ResolutionDone) {
        if !self.engine.complete(done.generation, done.resolution) {
            return;
        }
        self.resolution_task = None;

        if self.engine.phase() == SyncPhase::Active {
            let mut poll = tokio::time::interval(self.config.poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.poll = Some(poll);
            self.engine
                .update(self.source.current_position().as_secs_f64());
        }
        self.publish();
    }

    fn on_progress(&mut self, progress: Option<PlaybackProgress>) {
        // Events can trail the source, so only its current index decides the chapter
        match progress {
            Some(PlaybackProgress::ChapterChanged { .. }) => {
                self.on_chapter_index(self.source.current_chapter_index());
            }
            Some(PlaybackProgress::PositionUpdate {
                position,
                chapter_index,
            }) => {
                if self.on_chapter_index(self.source.current_chapter_index()) {
                    return;
                }
                if self.observed_chapter_index != Some(chapter_index) {
                    debug!(chapter_index, "Ignoring position from another chapter");
                    return;
                }
                self.recompute(position);
            }
            None => {
                warn!("Playback position stream closed; relying on polling");
                self.progress_rx = None;
            }
        }
    }

    fn on_poll(&mut self) {
        if self.on_chapter_index(self.source.current_chapter_index()) {
            return;
        }

        if self.engine.needs_refresh(self.resolver.cache_epoch()) {
            if let (Some(audiobook_id), Some(chapter_number), Some(chapter_index)) = (
                self.engine.audiobook_id().map(str::to_owned),
                self.engine.chapter_number(),
                self.observed_chapter_index,
            ) {
                info!(%audiobook_id, chapter_number, "Timestamp cache changed, resolving again");
                self.restart(audiobook_id, chapter_number, chapter_index);
                return;
            }
        }

        self.recompute(self.source.current_position());
    }

    /// Restart on a chapter index change. Returns true when a restart happened.
    fn on_chapter_index(&mut self, chapter_index: usize) -> bool {
        if self.observed_chapter_index == Some(chapter_index) {
            return false;
        }
        let Some(audiobook_id) = self.engine.audiobook_id().map(str::to_owned) else {
            return false;
        };

        let chapter_number = chapter_number_for_index(chapter_index);
        info!(
            %audiobook_id,
            previous = ?self.engine.chapter_number(),
            chapter_number,
            "Playback changed chapter"
        );
        self.restart(audiobook_id, chapter_number, chapter_index);
        true
    }

    fn seek_to_text(&mut self, char_offset: usize) {
        let Some(target) = self.engine.seek_target(char_offset) else {
            debug!(char_offset, "No timed segment under tap");
            return;
        };
        let position = match Duration::try_from_secs_f64(target.max(0.0)) {
            Ok(position) => position,
            Err(e) => {
                warn!(char_offset, target, "Segment start is not a playable position: {}", e);
                return;
            }
        };
        debug!(char_offset, target, "Seeking to segment");
        self.source.seek(position);
        if self.engine.update(target) {
            self.publish();
        }
    }

    fn recompute(&mut self, position: Duration) {
        if self.engine.update(position.as_secs_f64()) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.engine.snapshot());
    }
}

/// Bundles key chapters from 1, playback indexes them from 0
pub fn chapter_number_for_index(chapter_index: usize) -> u32 {
    u32::try_from(chapter_index)
        .unwrap_or(u32::MAX - 1)
        .saturating_add(1)
}

async fn next_progress(
    progress_rx: &mut Option<tokio_mpsc::UnboundedReceiver<PlaybackProgress>>,
) -> Option<PlaybackProgress> {
    match progress_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(poll) => {
            poll.tick().await;
        }
        None => std::future::pending().await,
    }
}
