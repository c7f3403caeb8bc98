//! Integration tests for switching the active backend
//!
//! These tests verify that the previous backend is fully torn down before the
//! new one takes over, and that the current track moves with the switch.

use crate::test_utils::{current_path, Harness};
use jukeboxd::backend::{BackendKind, CompletionSource};
use jukeboxd::player::PlaybackState;
use std::error::Error;
use std::time::Duration;
use tempfile::tempdir;

#[cfg(test)]
mod backend_switch_integration_tests {
    use super::*;

    /// Switching while playing tears the old backend down and restarts the track
    #[tokio::test]
    async fn test_switch_while_playing() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        let old = harness.backend_at(0);

        let reply = harness.handle.select_backend(BackendKind::HttpDaemon).await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.backend, BackendKind::HttpDaemon);
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);
        assert_eq!(current_path(&reply.snapshot).as_deref(), Some("/music/a.mp3"));

        {
            let state = old.state();
            assert!(state.shut_down);
            assert!(!state.alive);
            assert!(!state.playing);
        }
        let calls = old.calls();
        let force_stop = calls.iter().position(|c| c == "force_stop").expect("force_stop called");
        let kill_all = calls
            .iter()
            .position(|c| c == "kill_all_processes")
            .expect("kill_all_processes called");
        let shutdown = calls.iter().position(|c| c == "shutdown").expect("shutdown called");
        assert!(force_stop < kill_all && kill_all < shutdown);

        let new = harness.backend_at(1);
        assert_eq!(new.plays(), vec!["/music/a.mp3"]);
        assert!(new.state().alive);

        // The old backend can no longer reach the player.
        assert!(!old.complete(CompletionSource::ProcessExit));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.recorder.total(), 0);

        harness.shutdown().await;
        Ok(())
    }

    /// Selecting the active kind again is a no-op
    #[tokio::test]
    async fn test_select_same_backend_keeps_instance() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        let reply = harness.handle.select_backend(BackendKind::Process).await?;
        assert!(reply.ok);
        assert_eq!(harness.backends.lock().unwrap().len(), 1);
        assert_eq!(harness.backend().plays(), vec!["/music/a.mp3"]);

        harness.shutdown().await;
        Ok(())
    }

    /// A paused track restarts playing on the new backend
    #[tokio::test]
    async fn test_switch_while_paused_restarts() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.handle.pause().await?;

        let reply = harness.handle.select_backend(BackendKind::SocketDaemon).await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);
        assert_eq!(harness.backend().plays(), vec!["/music/a.mp3"]);

        harness.shutdown().await;
        Ok(())
    }

    /// Switching while idle starts nothing
    #[tokio::test]
    async fn test_switch_while_idle() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        let reply = harness.handle.select_backend(BackendKind::SocketDaemon).await?;
        assert!(reply.ok);
        assert_eq!(reply.snapshot.state, PlaybackState::Idle);
        assert_eq!(reply.snapshot.backend, BackendKind::SocketDaemon);
        assert!(harness.backend_at(0).state().shut_down);
        assert!(harness.backend().plays().is_empty());

        // The queue plays on the new backend.
        harness.handle.enqueue_path("/music/a.mp3").await?;
        assert_eq!(harness.backend().plays(), vec!["/music/a.mp3"]);
        assert!(harness.backend_at(0).plays().is_empty());

        harness.shutdown().await;
        Ok(())
    }

    /// A previous backend that hangs in teardown cannot wedge the switch
    #[tokio::test]
    async fn test_switch_survives_hung_teardown() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let harness = Harness::start(dir.path(), true).await;

        harness.handle.enqueue_path("/music/a.mp3").await?;
        harness.backend_at(0).state().hang_teardown = true;

        let started = std::time::Instant::now();
        let reply = harness.handle.select_backend(BackendKind::HttpDaemon).await?;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(reply.snapshot.backend, BackendKind::HttpDaemon);
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);
        assert_eq!(harness.backend_at(1).plays(), vec!["/music/a.mp3"]);

        // Still responsive afterwards.
        let snapshot = harness.snapshot().await;
        assert_eq!(current_path(&snapshot).as_deref(), Some("/music/a.mp3"));

        harness.shutdown().await;
        Ok(())
    }
}
