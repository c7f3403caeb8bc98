//! Play-count recording.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;

const LOG_TARGET: &str = "jukeboxd::stats";

#[derive(Debug)]
pub enum StatsError {
    IoError(io::Error),
    ParseError(String),
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::IoError(e) => write!(f, "Play count I/O error: {}", e),
            StatsError::ParseError(s) => write!(f, "Play count parse error: {}", s),
        }
    }
}

impl Error for StatsError {}

impl From<io::Error> for StatsError {
    fn from(err: io::Error) -> Self {
        StatsError::IoError(err)
    }
}

impl From<serde_json::Error> for StatsError {
    fn from(err: serde_json::Error) -> Self {
        StatsError::ParseError(err.to_string())
    }
}

/// Receives one call per completed track.
#[async_trait]
pub trait PlayRecorder: Send + Sync {
    async fn record_play(&self, path: &str) -> Result<(), StatsError>;
}

/// `{path: count}` JSON file.
pub struct PlayCountFile {
    path: PathBuf,
    // Serializes read-modify-write cycles from concurrent recordings.
    write_lock: TokioMutex<()>,
}

impl PlayCountFile {
    pub fn new(path: PathBuf) -> Self {
        PlayCountFile {
            path,
            write_lock: TokioMutex::new(()),
        }
    }

    pub async fn counts(&self) -> Result<BTreeMap<String, u64>, StatsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn count_for(&self, path: &str) -> Result<u64, StatsError> {
        Ok(self.counts().await?.get(path).copied().unwrap_or(0))
    }
}

#[async_trait]
impl PlayRecorder for PlayCountFile {
    async fn record_play(&self, path: &str) -> Result<(), StatsError> {
        let _guard = self.write_lock.lock().await;
        let mut counts = self.counts().await?;
        let count = counts.entry(path.to_string()).or_insert(0);
        *count += 1;
        debug!(target: LOG_TARGET, path, count = *count, "Recorded play.");

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&counts)?).await?;
        Ok(())
    }
}
