use super::Track;
use std::collections::VecDeque;

/// Ordered list of upcoming tracks; the front plays next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayQueue {
    tracks: VecDeque<Track>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        PlayQueue {
            tracks: tracks.into(),
        }
    }

    pub fn enqueue(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn dequeue_next(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Removes the track at `index`; out of range is a no-op.
    pub fn remove_at(&mut self, index: usize) -> Option<Track> {
        self.tracks.remove(index)
    }

    /// Moves one track from `from` to `to`. Both indices must be in bounds,
    /// otherwise the queue is left unchanged and `false` is returned.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        let len = self.tracks.len();
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return true;
        }
        match self.tracks.remove(from) {
            Some(track) => {
                self.tracks.insert(to, track);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
