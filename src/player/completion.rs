// src/player/completion.rs

use std::time::{Duration, Instant};

/// What to do with a completion for a track that is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchDecision {
    /// First completion: handle it.
    Acquire,
    /// Still cooling down from a different track; retry after the delay.
    Defer(Duration),
}

/// Guarantees one completion per track.
///
/// The latch remembers the last completed track id forever (duplicates for it
/// are always ignored) and stays closed for `cooldown` after each acquisition.
#[derive(Debug, Clone)]
pub struct CompletionLatch {
    cooldown: Duration,
    completed: Option<String>,
    release_at: Option<Instant>,
}

impl CompletionLatch {
    pub fn new(cooldown: Duration) -> Self {
        CompletionLatch {
            cooldown,
            completed: None,
            release_at: None,
        }
    }

    pub fn is_completed(&self, track_id: &str) -> bool {
        self.completed.as_deref() == Some(track_id)
    }

    pub fn is_cooling_down(&self, now: Instant) -> bool {
        self.release_at.map(|at| now < at).unwrap_or(false)
    }

    /// Claims the completion of `track_id`. Callers check `is_completed` first.
    pub fn try_acquire(&mut self, track_id: &str, now: Instant) -> LatchDecision {
        if let Some(at) = self.release_at {
            if now < at {
                return LatchDecision::Defer(at - now);
            }
            self.release_at = None;
        }
        self.completed = Some(track_id.to_string());
        self.release_at = Some(now + self.cooldown);
        LatchDecision::Acquire
    }
}
