use crate::backend::{BackendKind, BackendStatus, CompletionSource};
use crate::queue::{Track, TrackInfo};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use tokio::sync::oneshot;

pub type Responder = oneshot::Sender<CommandReply>;

/// Commands that can be sent to the Player task.
#[derive(Debug)]
pub enum PlayerCommand {
    Enqueue { info: TrackInfo, reply: Responder },
    RemoveAt { index: usize, reply: Responder },
    Reorder { from: usize, to: usize, reply: Responder },
    ClearQueue(Responder),
    Play(Responder),
    Pause(Responder),
    Resume(Responder),
    Stop(Responder),
    Skip(Responder),
    SeekTo { position: f64, reply: Responder },
    SetVolume { volume: f64, reply: Responder },
    ToggleMute(Responder),
    Snapshot(Responder),
    SelectBackend { kind: BackendKind, reply: Responder },
    Shutdown(Responder),
}

impl PlayerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerCommand::Enqueue { .. } => "enqueue",
            PlayerCommand::RemoveAt { .. } => "remove_at",
            PlayerCommand::Reorder { .. } => "reorder",
            PlayerCommand::ClearQueue(_) => "clear_queue",
            PlayerCommand::Play(_) => "play",
            PlayerCommand::Pause(_) => "pause",
            PlayerCommand::Resume(_) => "resume",
            PlayerCommand::Stop(_) => "stop",
            PlayerCommand::Skip(_) => "skip",
            PlayerCommand::SeekTo { .. } => "seek_to",
            PlayerCommand::SetVolume { .. } => "set_volume",
            PlayerCommand::ToggleMute(_) => "toggle_mute",
            PlayerCommand::Snapshot(_) => "snapshot",
            PlayerCommand::SelectBackend { .. } => "select_backend",
            PlayerCommand::Shutdown(_) => "shutdown",
        }
    }
}

/// Orchestrator playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No current track.
    Idle,
    Playing,
    Paused,
    /// Transient, only observable while a stop is in progress.
    Stopping,
    /// A current track is set but not playing: it failed to start or was
    /// restored from disk.
    Stalled,
}

/// A track-finished notification, tagged with the track it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub track_id: String,
    pub source: CompletionSource,
}

/// Point-in-time view of the player, computed on request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub is_playing: bool,
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub progress: f64,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    pub volume: f64,
    pub is_muted: bool,
    pub backend: BackendKind,
    pub backend_status: BackendStatus,
}

/// Every command answers with whether it took effect plus a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub ok: bool,
    pub snapshot: PlaybackSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// The player task is gone.
    Closed,
    /// The player dropped the reply channel without answering.
    NoReply,
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerError::Closed => write!(f, "Player task is not running"),
            PlayerError::NoReply => write!(f, "Player did not answer the command"),
        }
    }
}

impl Error for PlayerError {}
