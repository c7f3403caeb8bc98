//! Audio backend adapters and the selector that owns the active one.
//!
//! Every adapter implements [`PlaybackBackend`]. Methods never return errors:
//! I/O failures are logged and collapse into `false` or a safe default, so the
//! orchestrator treats a failed call as "did not happen".

mod duration;
mod error;
pub mod http_daemon;
pub mod process;
pub mod selector;
pub mod socket_daemon;
pub(crate) mod supervisor;
pub mod sweep;
pub mod volume;

pub use duration::{estimate_duration, estimate_from_size, DEFAULT_DURATION_SECS};
pub use error::BackendError;
pub use selector::{BackendFactory, BackendSelector, DefaultBackendFactory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

const LOG_TARGET: &str = "jukeboxd::backend";

/// The concrete player families the selector can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One short-lived decoder process per track.
    Process,
    /// Long-lived media daemon controlled over HTTP.
    HttpDaemon,
    /// Daemon controlled over a line-oriented TCP socket.
    SocketDaemon,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Process => "process",
            BackendKind::HttpDaemon => "http_daemon",
            BackendKind::SocketDaemon => "socket_daemon",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "process" => Ok(BackendKind::Process),
            "http_daemon" | "http" => Ok(BackendKind::HttpDaemon),
            "socket_daemon" | "socket" => Ok(BackendKind::SocketDaemon),
            other => Err(format!(
                "unknown backend '{}' (expected process, http_daemon or socket_daemon)",
                other
            )),
        }
    }
}

/// Which detection mechanism decided that a track ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    ProcessExit,
    DaemonExit,
    DaemonStopped,
    PositionAtEnd,
}

/// Callback registered by the orchestrator, invoked when the backend itself
/// determines that the current track finished.
pub type CompletionCallback = Arc<dyn Fn(CompletionSource) + Send + Sync + 'static>;

/// Observed backend liveness, as opposed to last-commanded intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub is_playing: bool,
    pub current_file: Option<String>,
    pub has_backend_process: bool,
    pub platform: String,
}

impl BackendStatus {
    pub fn idle() -> Self {
        BackendStatus {
            is_playing: false,
            current_file: None,
            has_backend_process: false,
            platform: platform(),
        }
    }
}

/// Transport state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Playing,
    Paused,
    Stopped,
    Unknown,
}

/// One raw position sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    /// The duration is a file-size guess, good for display and seek math only.
    pub duration_estimated: bool,
    pub state: DaemonState,
}

impl ProgressSample {
    /// Position as a fraction of the duration, clamped to [0,1].
    pub fn ratio(&self) -> f64 {
        match self.duration_secs {
            Some(d) if d > 0.0 => (self.position_secs / d).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

/// Uniform capability surface over a concrete audio player.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Stops any current playback, then starts `path`. Returns `true` only once
    /// the backend has been confirmed to be producing audio.
    async fn play_file(&self, path: &str) -> bool;

    /// Idempotent. Also sweeps for orphaned player processes. Never fires the
    /// completion callback.
    async fn stop(&self) -> bool;

    async fn pause(&self) -> bool;

    async fn resume(&self) -> bool;

    /// Seeks to a normalized position in [0,1].
    async fn seek(&self, position: f64) -> bool;

    /// Clamps, applies and returns the volume actually applied.
    async fn set_volume(&self, volume: f64) -> f64;

    async fn volume(&self) -> f64;

    async fn is_muted(&self) -> bool;

    /// Returns the new muted flag.
    async fn toggle_mute(&self) -> bool;

    async fn status(&self) -> BackendStatus;

    /// Current position sample, `None` when nothing is loaded.
    async fn progress(&self) -> Option<ProgressSample>;

    fn set_track_complete_callback(&self, callback: CompletionCallback);

    fn clear_track_complete_callback(&self);

    /// Best-effort duration in seconds, for progress and seek math only.
    async fn estimate_duration(&self, path: &str) -> f64;

    /// Whether `progress()` carries a backend-reported duration.
    fn reports_duration(&self) -> bool;

    /// Whether the backend detects completion on its own (e.g. process exit).
    /// When `false` the progress poller makes the completion decision.
    fn pushes_completion(&self) -> bool;

    /// Process name used for system-wide sweeps; `None` disables them.
    fn process_name(&self) -> Option<String>;

    /// Stops immediately without waiting for a graceful transport stop.
    async fn force_stop(&self);

    /// Kills every process this adapter owns.
    async fn kill_all_processes(&self);

    /// Releases everything; the adapter must not be used afterwards.
    async fn shutdown(&self);
}

/// Holder for the single completion callback of an adapter.
#[derive(Clone, Default)]
pub struct CompletionSlot {
    inner: Arc<Mutex<Option<CompletionCallback>>>,
}

impl CompletionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, callback: CompletionCallback) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(callback);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Invokes the callback if one is registered. Returns whether it ran.
    pub fn fire(&self, source: CompletionSource) -> bool {
        let callback = self
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        match callback {
            Some(cb) => {
                debug!(target: LOG_TARGET, ?source, "Firing track completion callback.");
                cb(source);
                true
            }
            None => {
                trace!(target: LOG_TARGET, ?source, "Completion detected but no callback registered.");
                false
            }
        }
    }
}

impl fmt::Debug for CompletionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Rejects paths that are not readable regular files before any backend is touched.
pub async fn ensure_readable(path: &str) -> Result<(), BackendError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| BackendError::FileUnreadable(format!("{}: {}", path, e)))?;
    if !metadata.is_file() {
        return Err(BackendError::FileUnreadable(format!("{} is not a regular file", path)));
    }
    Ok(())
}

pub fn platform() -> String {
    std::env::consts::OS.to_string()
}
