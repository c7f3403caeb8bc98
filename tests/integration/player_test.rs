//! Integration tests for the playback orchestrator
//!
//! These tests drive a running player through its handle against a scripted
//! backend and check queue order, completion handling and transport state.

use crate::test_utils::{current_path, queue_paths, wait_until, Harness};
use jukeboxd::backend::{CompletionSource, DaemonState, ProgressSample};
use jukeboxd::player::PlaybackState;
use std::error::Error;
use std::time::Duration;
use tempfile::tempdir;

#[cfg(test)]
mod player_integration_tests {
    use super::*;

    /// Enqueue into an idle player starts the track right away
    #[tokio::test]
    async fn test_enqueue_starts_playback_when_idle() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        let reply = harness.handle.enqueue_path("/music/a.mp3").await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);
        assert!(reply.snapshot.is_playing);
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/a.mp3"));
        assert!(reply.snapshot.queue.is_empty());
        assert_eq!(harness.backend().plays(), vec!["/music/a.mp3"]);
        assert!(harness.backend().has_callback());

        harness.shutdown().await;
        Ok(())
    }

    /// Tracks come out in insertion order and keep their ids
    #[tokio::test]
    async fn test_queue_is_fifo_with_stable_ids() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.enqueue_path("/music/b.mp3").await?;
        let reply = harness.handle.enqueue_path("/music/c.mp3").await?;
        assert_eq!(queue_paths(&reply.snapshot), vec!["/music/b.mp3", "/music/c.mp3"]);
        let b_id = reply.snapshot.queue[0].id.clone();
        let c_id = reply.snapshot.queue[1].id.clone();
        assert_ne!(b_id, c_id);

        let reply = harness.handle.skip().await?;
        let current = reply.snapshot.current_track.clone().expect("b is current");
        assert_eq!(current.id, b_id);
        assert_eq!(reply.snapshot.queue[0].id, c_id);

        let reply = harness.handle.skip().await?;
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/c.mp3"));
        assert_eq!(
            harness.backend().plays(),
            vec!["/music/a.mp3", "/music/b.mp3", "/music/c.mp3"]
        );

        harness.shutdown().await;
        Ok(())
    }

    /// A completion advances to the next track and counts the finished one
    #[tokio::test]
    async fn test_completion_advances_and_records_play() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.enqueue_path("/music/b.mp3").await?;
        assert!(harness.backend().complete(CompletionSource::ProcessExit));

        let advanced = wait_until(|| async {
            let snapshot = harness.snapshot().await;
            current_path(&snapshot).as_deref() == Some("/music/b.mp3")
        })
        .await;
        assert!(advanced);
        assert!(wait_until(|| async { harness.recorder.count("/music/a.mp3") == 1 }).await);

        let snapshot = harness.snapshot().await;
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(harness.recorder.count("/music/b.mp3"), 0);

        harness.shutdown().await;
        Ok(())
    }

    /// Two detectors reporting the same end produce one count and one advance
    #[tokio::test]
    async fn test_double_completion_is_latched() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.enqueue_path("/music/b.mp3").await?;
        harness.handle.enqueue_path("/music/c.mp3").await?;

        let backend = harness.backend();
        assert!(backend.complete(CompletionSource::ProcessExit));
        // The callback for `a` is still registered until the player advances.
        backend.complete(CompletionSource::PositionAtEnd);

        assert!(wait_until(|| async { harness.recorder.count("/music/a.mp3") == 1 }).await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snapshot = harness.snapshot().await;
        assert_eq!(current_path(&snapshot).as_deref(), Some("/music/b.mp3"));
        assert_eq!(queue_paths(&snapshot), vec!["/music/c.mp3"]);
        assert_eq!(harness.recorder.total(), 1);
        assert_eq!(backend.plays(), vec!["/music/a.mp3", "/music/b.mp3"]);

        harness.shutdown().await;
        Ok(())
    }

    /// A completion for the next track inside the cooldown is held, not lost
    #[tokio::test]
    async fn test_completion_during_cooldown_is_deferred() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.enqueue_path("/music/b.mp3").await?;
        harness.handle.enqueue_path("/music/c.mp3").await?;

        let backend = harness.backend();
        backend.complete(CompletionSource::ProcessExit);
        assert!(
            wait_until(|| async {
                current_path(&harness.snapshot().await).as_deref() == Some("/music/b.mp3")
            })
            .await
        );

        backend.complete(CompletionSource::ProcessExit);
        // Still inside the cooldown, so `b` keeps playing for now.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            current_path(&harness.snapshot().await).as_deref(),
            Some("/music/b.mp3")
        );

        assert!(
            wait_until(|| async {
                current_path(&harness.snapshot().await).as_deref() == Some("/music/c.mp3")
            })
            .await
        );
        assert!(wait_until(|| async { harness.recorder.count("/music/b.mp3") == 1 }).await);
        assert_eq!(harness.recorder.count("/music/a.mp3"), 1);

        harness.shutdown().await;
        Ok(())
    }

    /// Advancing past the last track leaves the player idle and silent
    #[tokio::test]
    async fn test_advance_on_empty_queue_goes_idle() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        let reply = harness.handle.skip().await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Idle);
        assert!(!reply.snapshot.is_playing);
        assert!(reply.snapshot.current_track.is_none());
        assert!(!reply.snapshot.backend_status.has_backend_process);
        assert!(harness.backend().calls().contains(&"stop".to_string()));

        // Play with nothing queued is refused.
        let reply = harness.handle.play().await?;
        assert!(!reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Idle);

        harness.shutdown().await;
        Ok(())
    }

    /// Stop silences the backend, keeps the queue and ignores late completions
    #[tokio::test]
    async fn test_stop_keeps_queue_and_ignores_late_completion() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.enqueue_path("/music/b.mp3").await?;
        let backend = harness.backend();

        let reply = harness.handle.stop().await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Idle);
        assert!(!reply.snapshot.is_playing);
        assert!(reply.snapshot.current_track.is_none());
        assert!(!reply.snapshot.backend_status.has_backend_process);
        assert_eq!(queue_paths(&reply.snapshot), vec!["/music/b.mp3"]);

        // Stop unregistered the callback, so nothing reaches the player.
        assert!(!backend.complete(CompletionSource::ProcessExit));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.recorder.total(), 0);

        let reply = harness.handle.play().await?;
        assert!(reply.ok);
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/b.mp3"));

        harness.shutdown().await;
        Ok(())
    }

    /// Pause and resume go through the backend and show up in the state
    #[tokio::test]
    async fn test_pause_and_resume() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        // Nothing to pause yet.
        assert!(!harness.handle.pause().await?.ok);

        harness.handle.enqueue_path("/music/a.mp3").await?;
        let reply = harness.handle.pause().await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Paused);
        assert!(!reply.snapshot.is_playing);

        let reply = harness.handle.play().await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);
        assert_eq!(
            harness.backend().calls().iter().filter(|c| *c == "resume").count(),
            1
        );

        harness.shutdown().await;
        Ok(())
    }

    /// Resume with no current track starts the head of the queue
    #[tokio::test]
    async fn test_resume_without_current_starts_next() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.enqueue_path("/music/b.mp3").await?;
        harness.handle.stop().await?;

        let reply = harness.handle.resume().await?;
        assert!(reply.ok);
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/b.mp3"));
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);

        harness.shutdown().await;
        Ok(())
    }

    /// Volume is clamped and zero means muted
    #[tokio::test]
    async fn test_volume_is_clamped() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        let reply = harness.handle.set_volume(1.5).await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.volume, 1.0);
        assert!(!reply.snapshot.is_muted);

        let reply = harness.handle.set_volume(-0.2).await?;
        assert_eq!(reply.snapshot.volume, 0.0);
        assert!(reply.snapshot.is_muted);

        harness.handle.set_volume(0.6).await?;
        let reply = harness.handle.toggle_mute().await?;
        assert!(reply.snapshot.is_muted);
        assert_eq!(reply.snapshot.volume, 0.0);
        let reply = harness.handle.toggle_mute().await?;
        assert!(!reply.snapshot.is_muted);
        assert!((reply.snapshot.volume - 0.6).abs() < 1e-9);

        harness.shutdown().await;
        Ok(())
    }

    /// Seek needs a current track and is clamped into range
    #[tokio::test]
    async fn test_seek() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        assert!(!harness.handle.seek_to(0.5).await?.ok);

        harness.handle.enqueue_path("/music/a.mp3").await?;
        assert!(harness.handle.seek_to(0.5).await?.ok);
        assert!(harness.handle.seek_to(7.0).await?.ok);
        let calls = harness.backend().calls();
        assert!(calls.contains(&"seek 0.50".to_string()));
        assert!(calls.contains(&"seek 1.00".to_string()));

        harness.shutdown().await;
        Ok(())
    }

    /// A track that fails to start stalls the player until retried
    #[tokio::test]
    async fn test_failed_start_stalls() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;
        harness.backend().fail_path("/music/broken.mp3");

        let reply = harness.handle.enqueue_path("/music/broken.mp3").await?;
        assert_eq!(reply.snapshot.state, PlaybackState::Stalled);
        assert!(!reply.snapshot.is_playing);
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/broken.mp3"));
        assert!(!harness.backend().has_callback());

        harness.backend().allow_path("/music/broken.mp3");
        let reply = harness.handle.play().await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);

        harness.shutdown().await;
        Ok(())
    }

    /// Queue edits only touch the waiting tracks
    #[tokio::test]
    async fn test_remove_reorder_and_clear() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        for path in ["/music/a.mp3", "/music/b.mp3", "/music/c.mp3", "/music/d.mp3"] {
            harness.handle.enqueue_path(path).await?;
        }

        let reply = harness.handle.reorder(2, 0).await?;
        assert!(reply.ok);
        assert_eq!(
            queue_paths(&reply.snapshot),
            vec!["/music/d.mp3", "/music/b.mp3", "/music/c.mp3"]
        );
        assert!(!harness.handle.reorder(0, 3).await?.ok);

        let reply = harness.handle.remove_at(1).await?;
        assert!(reply.ok);
        assert_eq!(queue_paths(&reply.snapshot), vec!["/music/d.mp3", "/music/c.mp3"]);
        assert!(!harness.handle.remove_at(5).await?.ok);

        let reply = harness.handle.clear_queue().await?;
        assert!(reply.snapshot.queue.is_empty());
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/a.mp3"));
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);

        harness.shutdown().await;
        Ok(())
    }

    /// Without pushed completion the progress poller decides the end
    #[tokio::test]
    async fn test_poller_detects_end_of_track() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), false).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        let snapshot = harness.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.duration_secs, Some(100.0));

        harness.backend().set_progress(Some(ProgressSample {
            position_secs: 99.5,
            duration_secs: Some(100.0),
            duration_estimated: false,
            state: DaemonState::Playing,
        }));

        assert!(wait_until(|| async { harness.recorder.count("/music/a.mp3") == 1 }).await);
        assert!(
            wait_until(|| async { harness.snapshot().await.state == PlaybackState::Idle }).await
        );
        assert_eq!(harness.recorder.total(), 1);

        harness.shutdown().await;
        Ok(())
    }

    /// A guessed length that has run out does not end a track the backend still plays
    #[tokio::test]
    async fn test_poller_ignores_estimated_length() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), false).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.backend().set_progress(Some(ProgressSample {
            position_secs: 5.0,
            duration_secs: Some(2.0),
            duration_estimated: true,
            state: DaemonState::Playing,
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = harness.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(current_path(&snapshot).as_deref(), Some("/music/a.mp3"));
        assert_eq!(harness.recorder.total(), 0);

        // The backend reporting stopped still ends it.
        harness.backend().set_progress(Some(ProgressSample {
            position_secs: 5.0,
            duration_secs: Some(2.0),
            duration_estimated: true,
            state: DaemonState::Stopped,
        }));
        assert!(wait_until(|| async { harness.recorder.count("/music/a.mp3") == 1 }).await);

        harness.shutdown().await;
        Ok(())
    }

    /// `is_playing` needs both the player's intent and audible backend output
    #[tokio::test]
    async fn test_is_playing_follows_backend() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        let reply = harness.handle.enqueue_path("/music/a.mp3").await?;
        assert!(reply.snapshot.is_playing);

        // The backend went quiet without reporting a completion yet.
        harness.backend().state().playing = false;
        let snapshot = harness.snapshot().await;
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert!(!snapshot.is_playing);
        assert!(!snapshot.backend_status.is_playing);

        harness.shutdown().await;
        Ok(())
    }
}
