//! Integration tests for queue persistence across restarts
//!
//! These tests verify that a restarted player picks up the saved queue and
//! current track without starting audio on its own.

use crate::test_utils::{current_path, queue_paths, Harness};
use jukeboxd::player::PlaybackState;
use jukeboxd::queue::{PersistedState, StateStore, Track, TrackInfo};
use std::error::Error;
use std::time::Duration;
use tempfile::tempdir;

#[cfg(test)]
mod queue_persistence_integration_tests {
    use super::*;

    /// Shutdown persists; the next start restores but does not play
    #[tokio::test]
    async fn test_restart_restores_without_autoplay() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;

        let first = Harness::start(dir.path(), true).await;
        first.handle.enqueue_path("/music/a.mp3").await?;
        first.handle.enqueue_path("/music/b.mp3").await?;
        let reply = first.handle.enqueue_path("/music/c.mp3").await?;
        let current_id = reply.snapshot.current_track.clone().expect("a is playing").id;
        let queued_ids: Vec<String> = reply.snapshot.queue.iter().map(|t| t.id.clone()).collect();
        first.shutdown().await;

        let second = Harness::start(dir.path(), true).await;
        let snapshot = second.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Stalled);
        assert!(!snapshot.is_playing);
        let restored = snapshot.current_track.clone().expect("current track restored");
        assert_eq!(restored.id, current_id);
        assert_eq!(restored.path, "/music/a.mp3");
        let restored_ids: Vec<String> = snapshot.queue.iter().map(|t| t.id.clone()).collect();
        assert_eq!(restored_ids, queued_ids);
        assert!(second.backend().plays().is_empty());

        // An explicit play restarts the restored track.
        let reply = second.handle.play().await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);
        assert_eq!(second.backend().plays(), vec!["/music/a.mp3"]);

        second.shutdown().await;
        Ok(())
    }

    /// Every queue edit is on disk before the reply arrives
    #[tokio::test]
    async fn test_queue_edits_are_persisted() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;
        let store = StateStore::new(dir.path().join("playback_state.json"), Duration::from_secs(3600));

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.enqueue_path("/music/b.mp3").await?;
        harness.handle.enqueue_path("/music/c.mp3").await?;
        harness.handle.reorder(1, 0).await?;

        let saved = store.load().await.expect("state saved");
        let saved_paths: Vec<&str> = saved.queue.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(saved_paths, vec!["/music/c.mp3", "/music/b.mp3"]);
        assert_eq!(saved.current_track.map(|t| t.path).as_deref(), Some("/music/a.mp3"));

        harness.handle.stop().await?;
        let saved = store.load().await.expect("state saved");
        assert!(saved.current_track.is_none());
        assert_eq!(saved.queue.len(), 2);

        harness.shutdown().await;
        Ok(())
    }

    /// A stale state file is ignored
    #[tokio::test]
    async fn test_stale_state_is_not_restored() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("playback_state.json"), Duration::from_secs(3600));
        let stale = PersistedState {
            queue: vec![Track::from_info(TrackInfo::from_path("/music/old.mp3"))],
            current_track: None,
            timestamp_millis: 1,
        };
        store.save(&stale).await?;

        let harness = Harness::start(dir.path(), true).await;
        let snapshot = harness.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.queue.is_empty());
        assert!(snapshot.current_track.is_none());

        harness.shutdown().await;
        Ok(())
    }

    /// A corrupt state file means starting empty, not failing
    #[tokio::test]
    async fn test_corrupt_state_starts_empty() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("playback_state.json"), "{\"queue\": [")?;

        let harness = Harness::start(dir.path(), true).await;
        let snapshot = harness.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.queue.is_empty());

        let reply = harness.handle.enqueue_path("/music/a.mp3").await?;
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/a.mp3"));
        assert!(queue_paths(&reply.snapshot).is_empty());

        harness.shutdown().await;
        Ok(())
    }
}
