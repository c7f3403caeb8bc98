use std::error::Error;
use std::io;

/// Error types raised inside backend adapters.
///
/// These never cross the [`PlaybackBackend`](super::PlaybackBackend) boundary:
/// adapters log them and collapse the result into a `bool` or a safe default.
#[derive(Debug)]
pub enum BackendError {
    IoError(io::Error),
    NetworkError(reqwest::Error),
    MixerError(String),
    ProtocolError(String),
    Timeout(String),
    FileUnreadable(String),
    NotRunning(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::IoError(e) => write!(f, "I/O error: {}", e),
            BackendError::NetworkError(e) => write!(f, "Network error: {}", e),
            BackendError::MixerError(e) => write!(f, "Mixer error: {}", e),
            BackendError::ProtocolError(e) => write!(f, "Protocol error: {}", e),
            BackendError::Timeout(e) => write!(f, "Timed out: {}", e),
            BackendError::FileUnreadable(e) => write!(f, "File unreadable: {}", e),
            BackendError::NotRunning(e) => write!(f, "Backend not running: {}", e),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::IoError(e) => Some(e),
            BackendError::NetworkError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<alsa::Error> for BackendError {
    fn from(e: alsa::Error) -> Self {
        BackendError::MixerError(e.to_string())
    }
}

impl From<io::Error> for BackendError {
    fn from(e: io::Error) -> Self {
        BackendError::IoError(e)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::NetworkError(e)
    }
}

impl From<tokio::time::error::Elapsed> for BackendError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        BackendError::Timeout(e.to_string())
    }
}
