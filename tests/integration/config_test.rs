//! Integration tests for configuration management
//!
//! These tests verify that the configuration system works correctly
//! across module boundaries.

use jukeboxd::backend::BackendKind;
use jukeboxd::config::Settings;
use jukeboxd::player::PlayerTimings;
use std::error::Error;
use std::time::Duration;
use tempfile::tempdir;

#[cfg(test)]
mod config_integration_tests {
    use super::*;

    /// Test complete configuration workflow
    #[test]
    fn test_config_lifecycle() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let config_path = dir.path().join("nested").join("config.json");

        let mut settings = Settings::default();
        settings.backend = BackendKind::SocketDaemon;
        settings.data_dir = Some(dir.path().join("data"));
        settings.completion_cooldown_ms = 750;
        settings.socket_daemon.address = "127.0.0.1:6601".to_string();
        settings.socket_daemon.music_root = Some(dir.path().join("music"));
        settings.http_daemon.password = "secret".to_string();

        settings.validate()?;
        settings.save(&config_path)?;

        let loaded = Settings::load(&config_path)?;
        assert_eq!(loaded, settings);
        assert_eq!(loaded.state_file_path(), dir.path().join("data").join("playback_state.json"));
        assert_eq!(loaded.play_counts_path(), dir.path().join("data").join("play_counts.json"));
        Ok(())
    }

    /// Settings feed the orchestrator's timings
    #[test]
    fn test_timings_follow_settings() {
        let mut settings = Settings::default();
        settings.completion_cooldown_ms = 200;
        settings.progress_interval_ms = 50;
        settings.backend_timeout_ms = 3000;

        let timings = PlayerTimings::from_settings(&settings);
        assert_eq!(timings.completion_cooldown, Duration::from_millis(200));
        assert_eq!(timings.progress_interval, Duration::from_millis(50));
        assert_eq!(timings.backend_timeout, Duration::from_secs(3));
    }

    /// A hand-written file only needs the keys it changes
    #[test]
    fn test_handwritten_config() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{ "backend": "http_daemon", "http_daemon": { "port": 9090, "spawn": false } }"#,
        )?;

        let loaded = Settings::load(&config_path)?;
        assert_eq!(loaded.backend, BackendKind::HttpDaemon);
        assert_eq!(loaded.http_daemon.port, 9090);
        assert!(!loaded.http_daemon.spawn);
        assert_eq!(loaded.http_daemon.host, "127.0.0.1");
        assert_eq!(loaded.process.program, "mpg123");
        loaded.validate()?;
        Ok(())
    }

    /// Invalid files are rejected rather than silently defaulted
    #[test]
    fn test_invalid_config_rejected() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, "{ not json")?;
        assert!(Settings::load(&config_path).is_err());

        std::fs::write(&config_path, r#"{ "backend": "winamp" }"#)?;
        assert!(Settings::load(&config_path).is_err());

        std::fs::write(&config_path, r#"{ "backend_timeout_ms": 0 }"#)?;
        let loaded = Settings::load(&config_path)?;
        assert!(loaded.validate().is_err());
        Ok(())
    }
}
