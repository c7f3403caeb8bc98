//! Playback orchestrator: a single task owning the queue, the current track and
//! the active backend. Everything else talks to it through [`PlayerHandle`].

use crate::backend::{BackendKind, BackendSelector, PlaybackBackend};
use crate::config::Settings;
use crate::queue::{PersistedState, PlayQueue, StateStore, Track, TrackInfo};
use crate::stats::PlayRecorder;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

mod command_handler;
mod completion;
mod playback_starter;
mod progress;
mod progress_poller;
mod run_loop;
mod state;

pub use completion::{CompletionLatch, LatchDecision};
pub use progress::{PlaybackProgressInfo, SharedProgress};
pub use progress_poller::completion_reached;
pub use state::{
    CommandReply, CompletionEvent, PlaybackSnapshot, PlaybackState, PlayerCommand, PlayerError,
};

const PLAYER_LOG_TARGET: &str = "jukeboxd::player";

/// Default capacity of the command channel.
pub const COMMAND_BUFFER_SIZE: usize = 32;

/// Timing knobs of the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerTimings {
    pub completion_cooldown: StdDuration,
    pub progress_interval: StdDuration,
    pub backend_timeout: StdDuration,
}

impl PlayerTimings {
    pub fn from_settings(settings: &Settings) -> Self {
        PlayerTimings {
            completion_cooldown: settings.completion_cooldown(),
            progress_interval: settings.progress_interval(),
            backend_timeout: settings.backend_timeout(),
        }
    }
}

impl Default for PlayerTimings {
    fn default() -> Self {
        PlayerTimings::from_settings(&Settings::default())
    }
}

/// Runs `fut` with the backend call timeout. A timeout is logged and yields `None`.
async fn bounded<T>(limit: StdDuration, what: &str, fut: impl Future<Output = T>) -> Option<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: PLAYER_LOG_TARGET, call = what, "Backend call timed out after {:?}.", limit);
            None
        }
    }
}

/// Manages playback state, queue, and interaction with the audio backend.
pub struct Player {
    // --- Collaborators ---
    selector: BackendSelector,
    backend: Arc<dyn PlaybackBackend>,
    backend_kind: BackendKind,
    store: StateStore,
    recorder: Arc<dyn PlayRecorder>,
    timings: PlayerTimings,

    // --- State ---
    queue: PlayQueue,
    current_track: Option<Track>,
    state: PlaybackState,
    is_paused: Arc<TokioMutex<bool>>,
    current_progress: SharedProgress,
    latch: CompletionLatch,
    deferred_completion: Option<(CompletionEvent, Instant)>,

    // --- Communication ---
    command_rx: mpsc::Receiver<PlayerCommand>,
    completion_tx: mpsc::UnboundedSender<CompletionEvent>,
    completion_rx: mpsc::UnboundedReceiver<CompletionEvent>,

    poller: Option<progress_poller::PollerHandle>,
}

impl Player {
    /// Creates the player, activates `kind` and restores fresh persisted state.
    /// A restored current track is left `Stalled`; nothing starts playing.
    pub async fn new(
        mut selector: BackendSelector,
        kind: BackendKind,
        store: StateStore,
        recorder: Arc<dyn PlayRecorder>,
        timings: PlayerTimings,
        command_buffer_size: usize,
    ) -> (Self, PlayerHandle) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer_size);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let backend = selector.select(kind).await;

        let (queue, current_track) = match store.load().await {
            Some(saved) => {
                info!(
                    target: PLAYER_LOG_TARGET,
                    queue_len = saved.queue.len(),
                    has_current = saved.current_track.is_some(),
                    "Restored playback state."
                );
                (PlayQueue::from_tracks(saved.queue), saved.current_track)
            }
            None => (PlayQueue::new(), None),
        };
        let state = if current_track.is_some() {
            PlaybackState::Stalled
        } else {
            PlaybackState::Idle
        };

        let player = Player {
            selector,
            backend,
            backend_kind: kind,
            store,
            recorder,
            latch: CompletionLatch::new(timings.completion_cooldown),
            timings,
            queue,
            current_track,
            state,
            is_paused: Arc::new(TokioMutex::new(false)),
            current_progress: Arc::new(TokioMutex::new(PlaybackProgressInfo::default())),
            deferred_completion: None,
            command_rx,
            completion_tx,
            completion_rx,
            poller: None,
        };
        (player, PlayerHandle { command_tx })
    }

    /// Builds the player and spawns its run loop.
    pub async fn spawn(
        selector: BackendSelector,
        kind: BackendKind,
        store: StateStore,
        recorder: Arc<dyn PlayRecorder>,
        timings: PlayerTimings,
    ) -> (PlayerHandle, JoinHandle<()>) {
        let (player, handle) =
            Player::new(selector, kind, store, recorder, timings, COMMAND_BUFFER_SIZE).await;
        let task = tokio::spawn(player.run());
        (handle, task)
    }

    /// Runs the player's command processing loop. This should be spawned as a Tokio task.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        run_loop::run_player_loop(&mut self).await;
    }

    // --- Private Helper Methods ---

    /// Writes queue and current track to disk. Failures are logged only.
    async fn persist(&self) {
        let state = PersistedState::capture(self.queue.tracks(), self.current_track.clone());
        if let Err(e) = self.store.save(&state).await {
            warn!(target: PLAYER_LOG_TARGET, "Failed to persist playback state: {}", e);
        }
    }

    async fn cancel_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }
    }

    async fn set_paused(&self, paused: bool) {
        *self.is_paused.lock().await = paused;
    }

    async fn reset_progress(&self) {
        *self.current_progress.lock().await = PlaybackProgressInfo::default();
    }

    /// Constructs a fresh snapshot by querying the active backend.
    async fn snapshot(&self) -> PlaybackSnapshot {
        let limit = self.timings.backend_timeout;
        let backend = self.backend.clone();

        if self.current_track.is_some() {
            if let Some(Some(sample)) = bounded(limit, "progress", backend.progress()).await {
                *self.current_progress.lock().await = PlaybackProgressInfo::from_sample(&sample);
            }
        }
        let progress = self.current_progress.lock().await.clone();
        let volume = bounded(limit, "volume", backend.volume()).await.unwrap_or(0.0);
        let is_muted = bounded(limit, "is_muted", backend.is_muted()).await.unwrap_or(false);
        let backend_status = match bounded(limit, "status", backend.status()).await {
            Some(status) => status,
            None => crate::backend::BackendStatus::idle(),
        };

        PlaybackSnapshot {
            state: self.state,
            is_playing: self.state == PlaybackState::Playing && backend_status.is_playing,
            current_track: self.current_track.clone(),
            queue: self.queue.tracks(),
            progress: progress.ratio(),
            position_secs: progress.current_seconds,
            duration_secs: progress.total_seconds,
            volume,
            is_muted,
            backend: self.backend_kind,
            backend_status,
        }
    }
}

/// Cloneable client of the player task.
#[derive(Clone, Debug)]
pub struct PlayerHandle {
    command_tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<CommandReply>) -> PlayerCommand,
    ) -> Result<CommandReply, PlayerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| PlayerError::Closed)?;
        reply_rx.await.map_err(|_| PlayerError::NoReply)
    }

    pub async fn enqueue(&self, info: TrackInfo) -> Result<CommandReply, PlayerError> {
        self.request(|reply| PlayerCommand::Enqueue { info, reply }).await
    }

    pub async fn enqueue_path(&self, path: &str) -> Result<CommandReply, PlayerError> {
        self.enqueue(TrackInfo::from_path(path)).await
    }

    pub async fn remove_at(&self, index: usize) -> Result<CommandReply, PlayerError> {
        self.request(|reply| PlayerCommand::RemoveAt { index, reply }).await
    }

    pub async fn reorder(&self, from: usize, to: usize) -> Result<CommandReply, PlayerError> {
        self.request(|reply| PlayerCommand::Reorder { from, to, reply }).await
    }

    pub async fn clear_queue(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::ClearQueue).await
    }

    pub async fn play(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::Play).await
    }

    pub async fn pause(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::Stop).await
    }

    pub async fn skip(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::Skip).await
    }

    pub async fn seek_to(&self, position: f64) -> Result<CommandReply, PlayerError> {
        self.request(|reply| PlayerCommand::SeekTo { position, reply }).await
    }

    pub async fn set_volume(&self, volume: f64) -> Result<CommandReply, PlayerError> {
        self.request(|reply| PlayerCommand::SetVolume { volume, reply }).await
    }

    pub async fn toggle_mute(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::ToggleMute).await
    }

    pub async fn snapshot(&self) -> Result<PlaybackSnapshot, PlayerError> {
        Ok(self.request(PlayerCommand::Snapshot).await?.snapshot)
    }

    pub async fn select_backend(&self, kind: BackendKind) -> Result<CommandReply, PlayerError> {
        self.request(|reply| PlayerCommand::SelectBackend { kind, reply }).await
    }

    /// Stops playback, persists, shuts the backend down and ends the player task.
    pub async fn shutdown(&self) -> Result<CommandReply, PlayerError> {
        self.request(PlayerCommand::Shutdown).await
    }
}
