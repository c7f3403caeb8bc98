use crate::backend::ProgressSample;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

/// Holds the current playback progress information.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlaybackProgressInfo {
    pub current_seconds: f64,
    pub total_seconds: Option<f64>,
}

impl PlaybackProgressInfo {
    pub fn from_sample(sample: &ProgressSample) -> Self {
        PlaybackProgressInfo {
            current_seconds: sample.position_secs,
            total_seconds: sample.duration_secs,
        }
    }

    /// Fraction played, clamped to [0,1]. Zero without a known total.
    pub fn ratio(&self) -> f64 {
        match self.total_seconds {
            Some(total) if total > 0.0 => (self.current_seconds / total).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

// Type alias for the shared progress tracker
pub type SharedProgress = Arc<TokioMutex<PlaybackProgressInfo>>;
