//! Tracks, the play queue and its on-disk record.

mod persistence;
mod store;
mod track;

pub use persistence::{now_millis, PersistedState, StateError, StateStore};
pub use store::PlayQueue;
pub use track::{Track, TrackInfo};
