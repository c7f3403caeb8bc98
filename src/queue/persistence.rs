//! Crash-recovery record of the queue and current track.

use super::Track;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "jukeboxd::queue::persistence";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub queue: Vec<Track>,
    pub current_track: Option<Track>,
    pub timestamp_millis: u64,
}

impl PersistedState {
    /// Captures the given queue and current track, stamped with the current time.
    pub fn capture(queue: Vec<Track>, current_track: Option<Track>) -> Self {
        PersistedState {
            queue,
            current_track,
            timestamp_millis: now_millis(),
        }
    }

    pub fn is_fresh(&self, freshness: Duration, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.timestamp_millis) <= freshness.as_millis() as u64
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
pub enum StateError {
    IoError(io::Error),
    SerializationError(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::IoError(e) => write!(f, "State file I/O error: {}", e),
            StateError::SerializationError(s) => write!(f, "State serialization error: {}", s),
        }
    }
}

impl Error for StateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StateError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StateError {
    fn from(err: io::Error) -> Self {
        StateError::IoError(err)
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::SerializationError(err.to_string())
    }
}

/// JSON file holding the last [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    freshness: Duration,
}

impl StateStore {
    pub fn new(path: PathBuf, freshness: Duration) -> Self {
        StateStore { path, freshness }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the state atomically: temp file, then rename over the old one.
    pub async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(target: LOG_TARGET, path = %self.path.display(), queue_len = state.queue.len(), "Playback state saved.");
        Ok(())
    }

    /// Returns the saved state unless it is missing, stale or unreadable.
    pub async fn load(&self) -> Option<PersistedState> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(target: LOG_TARGET, path = %self.path.display(), "No saved playback state.");
                return None;
            }
            Err(e) => {
                warn!(target: LOG_TARGET, path = %self.path.display(), "Cannot read playback state: {}", e);
                return None;
            }
        };
        let state: PersistedState = match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(target: LOG_TARGET, path = %self.path.display(), "Ignoring corrupt playback state: {}", e);
                return None;
            }
        };
        if !state.is_fresh(self.freshness, now_millis()) {
            info!(target: LOG_TARGET, saved_at = state.timestamp_millis, "Saved playback state is stale, starting empty.");
            return None;
        }
        Some(state)
    }
}
