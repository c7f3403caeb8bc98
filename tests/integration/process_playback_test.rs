//! Integration tests running the real process backend
//!
//! A shell one-liner stands in for the decoder so that process exit drives
//! track completion end to end, including the play-count file.

use crate::test_utils::{test_timings, wait_until};
use jukeboxd::backend::{BackendKind, BackendSelector, DefaultBackendFactory};
use jukeboxd::config::{ProcessSettings, Settings, SocketDaemonSettings};
use jukeboxd::player::{PlaybackState, Player};
use jukeboxd::queue::StateStore;
use jukeboxd::stats::PlayCountFile;
use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, NamedTempFile};

fn shell_settings(script: &str) -> Settings {
    let mut settings = Settings::default();
    settings.process = ProcessSettings {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "sh".to_string(), "{path}".to_string()],
        process_name: None,
        grace_period_ms: 50,
        sweep_orphans: false,
    };
    settings
}

fn audio_file(dir: &Path) -> Result<NamedTempFile, Box<dyn Error>> {
    let mut file = tempfile::Builder::new().suffix(".mp3").tempfile_in(dir)?;
    file.write_all(&[0u8; 16_000])?;
    Ok(file)
}

#[cfg(test)]
mod process_playback_integration_tests {
    use super::*;

    /// Two short tracks play back to back and each is counted once
    #[tokio::test]
    async fn test_tracks_play_through_and_are_counted() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let settings = shell_settings("sleep 0.3");
        let counts = Arc::new(PlayCountFile::new(dir.path().join("play_counts.json")));
        let (handle, task) = Player::spawn(
            BackendSelector::new(Box::new(DefaultBackendFactory::new(settings))),
            BackendKind::Process,
            StateStore::new(dir.path().join("playback_state.json"), Duration::from_secs(3600)),
            counts.clone(),
            test_timings(),
        )
        .await;

        let first = audio_file(dir.path())?;
        let second = audio_file(dir.path())?;
        let first_path = first.path().to_string_lossy().to_string();
        let second_path = second.path().to_string_lossy().to_string();

        let reply = handle.enqueue_path(&first_path).await?;
        assert_eq!(reply.snapshot.state, PlaybackState::Playing);
        assert!(reply.snapshot.backend_status.has_backend_process);
        handle.enqueue_path(&second_path).await?;

        let finished = wait_until(|| async {
            counts.count_for(&second_path).await.unwrap_or(0) == 1
        })
        .await;
        assert!(finished);
        assert_eq!(counts.count_for(&first_path).await?, 1);

        let idle = wait_until(|| async {
            handle
                .snapshot()
                .await
                .map(|s| s.state == PlaybackState::Idle)
                .unwrap_or(false)
        })
        .await;
        assert!(idle);
        let snapshot = handle.snapshot().await?;
        assert!(snapshot.current_track.is_none());
        assert!(!snapshot.backend_status.has_backend_process);

        handle.shutdown().await?;
        task.await?;
        Ok(())
    }

    /// Stopping kills the player process and counts nothing
    #[tokio::test]
    async fn test_stop_kills_process() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let settings = shell_settings("sleep 5");
        let counts = Arc::new(PlayCountFile::new(dir.path().join("play_counts.json")));
        let (handle, task) = Player::spawn(
            BackendSelector::new(Box::new(DefaultBackendFactory::new(settings))),
            BackendKind::Process,
            StateStore::new(dir.path().join("playback_state.json"), Duration::from_secs(3600)),
            counts.clone(),
            test_timings(),
        )
        .await;

        let track = audio_file(dir.path())?;
        let track_path = track.path().to_string_lossy().to_string();
        let reply = handle.enqueue_path(&track_path).await?;
        assert!(reply.snapshot.is_playing);

        let reply = handle.stop().await?;
        assert!(!reply.snapshot.is_playing);
        assert!(!reply.snapshot.backend_status.has_backend_process);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counts.count_for(&track_path).await?, 0);

        handle.shutdown().await?;
        task.await?;
        Ok(())
    }

    /// An unreadable path stalls the player instead of spawning anything
    #[tokio::test]
    async fn test_unreadable_file_stalls() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let settings = shell_settings("sleep 5");
        let counts = Arc::new(PlayCountFile::new(dir.path().join("play_counts.json")));
        let (handle, task) = Player::spawn(
            BackendSelector::new(Box::new(DefaultBackendFactory::new(settings))),
            BackendKind::Process,
            StateStore::new(dir.path().join("playback_state.json"), Duration::from_secs(3600)),
            counts,
            test_timings(),
        )
        .await;

        let missing = dir.path().join("missing.mp3");
        let reply = handle.enqueue_path(&missing.to_string_lossy()).await?;
        assert_eq!(reply.snapshot.state, PlaybackState::Stalled);
        assert!(!reply.snapshot.backend_status.has_backend_process);

        handle.shutdown().await?;
        task.await?;
        Ok(())
    }

    /// Switching away from a playing process backend leaves no player process behind
    #[tokio::test]
    async fn test_switch_kills_player_process() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let pid_file = dir.path().join("player.pid");
        let mut settings =
            shell_settings(&format!("echo $$ > '{}'; exec sleep 5", pid_file.display()));
        settings.socket_daemon = SocketDaemonSettings {
            address: "127.0.0.1:1".to_string(),
            music_root: Some(dir.path().to_path_buf()),
            spawn: false,
            request_timeout_ms: 200,
            ..SocketDaemonSettings::default()
        };
        let counts = Arc::new(PlayCountFile::new(dir.path().join("play_counts.json")));
        let (handle, task) = Player::spawn(
            BackendSelector::new(Box::new(DefaultBackendFactory::new(settings))),
            BackendKind::Process,
            StateStore::new(dir.path().join("playback_state.json"), Duration::from_secs(3600)),
            counts.clone(),
            test_timings(),
        )
        .await;

        let track = audio_file(dir.path())?;
        let track_path = track.path().to_string_lossy().to_string();
        let reply = handle.enqueue_path(&track_path).await?;
        assert!(reply.snapshot.backend_status.has_backend_process);

        let written = wait_until(|| async {
            std::fs::read_to_string(&pid_file)
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false)
        })
        .await;
        assert!(written);
        let pid: libc::pid_t = std::fs::read_to_string(&pid_file)?.trim().parse()?;
        assert_eq!(unsafe { libc::kill(pid, 0) }, 0);

        // The socket daemon is unreachable, so the track stalls on the new backend.
        let reply = handle.select_backend(BackendKind::SocketDaemon).await?;
        assert_eq!(reply.snapshot.backend, BackendKind::SocketDaemon);
        assert_eq!(reply.snapshot.state, PlaybackState::Stalled);

        let gone = wait_until(|| async { (unsafe { libc::kill(pid, 0) }) != 0 }).await;
        assert!(gone, "player process {} survived the backend switch", pid);
        assert_eq!(counts.count_for(&track_path).await?, 0);

        handle.shutdown().await?;
        task.await?;
        Ok(())
    }
}
