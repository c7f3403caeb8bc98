//! HTTP daemon backend: a long-lived media player driven through its
//! `/requests/status.json` control interface.

use super::supervisor::{
    confirm_playing, daemon_exit_hook, lock_track, DaemonLaunch, DaemonSupervisor, LoadedTrack,
    SharedTrack,
};
use super::volume::{apply_system_volume, clamp_volume, quantize, SystemMixer, VolumeState};
use super::{
    ensure_readable, estimate_duration, platform, sweep, BackendError, BackendKind, BackendStatus,
    CompletionCallback, CompletionSlot, DaemonState, PlaybackBackend, ProgressSample,
};
use crate::config::HttpDaemonSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const LOG_TARGET: &str = "jukeboxd::backend::http_daemon";

/// Daemon volume scale: 256 is 100%.
const DAEMON_VOLUME_MAX: i64 = 256;

const STARTUP_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Subset of the daemon's `status.json` document.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DaemonStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub volume: f64,
}

impl DaemonStatus {
    pub fn daemon_state(&self) -> DaemonState {
        match self.state.as_str() {
            "playing" => DaemonState::Playing,
            "paused" => DaemonState::Paused,
            "stopped" => DaemonState::Stopped,
            _ => DaemonState::Unknown,
        }
    }

    pub fn length_secs(&self) -> Option<f64> {
        (self.length > 0.0).then_some(self.length)
    }
}

/// Converts a local path to the `file://` URI the daemon expects.
pub async fn file_uri(path: &str) -> Result<String, BackendError> {
    let absolute = tokio::fs::canonicalize(path).await?;
    Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|_| BackendError::FileUnreadable(format!("{} cannot be expressed as a file URI", path)))
}

pub struct HttpDaemonBackend {
    settings: HttpDaemonSettings,
    client: Client,
    mixer: Option<SystemMixer>,
    volume: Mutex<VolumeState>,
    completion: CompletionSlot,
    track: SharedTrack,
    supervisor: DaemonSupervisor,
}

impl HttpDaemonBackend {
    pub fn new(settings: HttpDaemonSettings, mixer: Option<SystemMixer>) -> Self {
        info!(target: LOG_TARGET, url = %settings.base_url(), spawn = settings.spawn, "Creating HTTP daemon backend.");

        let client = match Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(target: LOG_TARGET, "Error creating HTTP client with timeout: {:?}. Falling back to default.", e);
                Client::new()
            }
        };

        let completion = CompletionSlot::new();
        let track: SharedTrack = Arc::new(Mutex::new(LoadedTrack::default()));
        let launch = DaemonLaunch {
            spawn: settings.spawn,
            program: settings.program.clone(),
            args: settings.launch_args(),
            startup_retries: settings.startup_retries,
            retry_delay: STARTUP_RETRY_DELAY,
        };
        let supervisor = DaemonSupervisor::new(
            "http-daemon",
            launch,
            daemon_exit_hook(track.clone(), completion.clone()),
        );

        HttpDaemonBackend {
            settings,
            client,
            mixer,
            volume: Mutex::new(VolumeState::default()),
            completion,
            track,
            supervisor,
        }
    }

    fn status_url(&self) -> String {
        format!("{}/requests/status.json", self.settings.base_url())
    }

    /// One round trip to the control interface. `params` empty means a plain
    /// status query.
    async fn request(&self, params: &[(&str, String)]) -> Result<DaemonStatus, BackendError> {
        debug!(target: LOG_TARGET, ?params, "Sending daemon request.");
        let response = self
            .client
            .get(self.status_url())
            .basic_auth("", Some(&self.settings.password))
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        let status = response.json::<DaemonStatus>().await?;
        Ok(status)
    }

    async fn is_reachable(&self) -> bool {
        self.request(&[]).await.is_ok()
    }

    /// Sends a command, restarting an unresponsive daemon once before giving up.
    async fn command(&self, params: &[(&str, String)]) -> Result<DaemonStatus, BackendError> {
        match self.request(params).await {
            Ok(status) => Ok(status),
            Err(first) => {
                warn!(target: LOG_TARGET, "Daemon request failed, checking daemon: {}", first);
                if !self.supervisor.ensure_running(|| self.is_reachable()).await {
                    return Err(BackendError::NotRunning(format!(
                        "HTTP daemon at {} is unavailable",
                        self.settings.base_url()
                    )));
                }
                self.request(params).await
            }
        }
    }

    async fn sample_state(&self) -> Option<DaemonState> {
        self.request(&[]).await.ok().map(|s| s.daemon_state())
    }

    fn sweep_name(&self) -> String {
        Path::new(&self.settings.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.settings.program)
            .to_string()
    }

    /// Kills stray daemon processes other than the one we own. A daemon we do
    /// not launch is somebody else's and is left alone.
    async fn sweep_orphans(&self) {
        if !self.supervisor.launches() {
            return;
        }
        let keep = self.supervisor.owned_pid().await;
        let killed = sweep::kill_orphans(&self.sweep_name(), keep).await;
        if killed > 0 {
            warn!(target: LOG_TARGET, killed, "Swept orphaned daemon processes.");
        }
    }

    fn forget_track(&self) {
        *lock_track(&self.track) = LoadedTrack::default();
    }

    /// Pushes `level` to the daemon mixer and returns the quantized value.
    async fn apply_daemon_volume(&self, level: f64) -> f64 {
        let (raw, applied) = quantize(level, 0, DAEMON_VOLUME_MAX);
        if let Err(e) = self.command(&[("command", "volume".to_string()), ("val", raw.to_string())]).await {
            warn!(target: LOG_TARGET, "Failed to set daemon volume: {}", e);
        }
        applied
    }
}

#[async_trait]
impl PlaybackBackend for HttpDaemonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpDaemon
    }

    #[instrument(skip(self))]
    async fn play_file(&self, path: &str) -> bool {
        if let Err(e) = ensure_readable(path).await {
            warn!(target: LOG_TARGET, "Refusing to play: {}", e);
            return false;
        }
        let uri = match file_uri(path).await {
            Ok(uri) => uri,
            Err(e) => {
                warn!(target: LOG_TARGET, "Refusing to play: {}", e);
                return false;
            }
        };
        if !self.supervisor.ensure_running(|| self.is_reachable()).await {
            error!(target: LOG_TARGET, "HTTP daemon unavailable, cannot play.");
            return false;
        }

        self.forget_track();
        for params in [
            vec![("command", "pl_stop".to_string())],
            vec![("command", "pl_empty".to_string())],
        ] {
            if let Err(e) = self.command(&params).await {
                warn!(target: LOG_TARGET, "Failed to clear daemon playlist: {}", e);
            }
        }

        if let Err(e) = self
            .command(&[("command", "in_play".to_string()), ("input", uri.clone())])
            .await
        {
            error!(target: LOG_TARGET, %uri, "Daemon rejected load: {}", e);
            return false;
        }

        let confirm_within = Duration::from_millis(self.settings.confirm_timeout_ms);
        if !confirm_playing(confirm_within, || self.sample_state()).await {
            warn!(target: LOG_TARGET, path, "Daemon did not report playing in time.");
            return false;
        }

        let reported = self.request(&[]).await.ok().and_then(|s| s.length_secs());
        let duration_secs = match reported {
            Some(length) => length,
            None => estimate_duration(path).await,
        };
        *lock_track(&self.track) = LoadedTrack {
            path: Some(path.to_string()),
            duration_secs: Some(duration_secs),
            playing: true,
        };
        info!(target: LOG_TARGET, path, duration_secs, "HTTP daemon playing.");
        true
    }

    async fn stop(&self) -> bool {
        self.forget_track();
        // An unreachable daemon is not playing anything either.
        if let Err(e) = self.request(&[("command", "pl_stop".to_string())]).await {
            debug!(target: LOG_TARGET, "Stop request failed: {}", e);
        }
        self.sweep_orphans().await;
        true
    }

    async fn pause(&self) -> bool {
        match self.command(&[("command", "pl_forcepause".to_string())]).await {
            Ok(_) => {
                lock_track(&self.track).playing = false;
                true
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to pause daemon: {}", e);
                false
            }
        }
    }

    async fn resume(&self) -> bool {
        match self.command(&[("command", "pl_forceresume".to_string())]).await {
            Ok(_) => {
                let mut track = lock_track(&self.track);
                track.playing = track.path.is_some();
                true
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to resume daemon: {}", e);
                false
            }
        }
    }

    async fn seek(&self, position: f64) -> bool {
        let known = lock_track(&self.track).duration_secs;
        let duration = match known {
            Some(d) => d,
            None => match self.request(&[]).await.ok().and_then(|s| s.length_secs()) {
                Some(d) => d,
                None => return false,
            },
        };
        let seconds = (position.clamp(0.0, 1.0) * duration).round() as i64;
        match self
            .command(&[("command", "seek".to_string()), ("val", seconds.to_string())])
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(target: LOG_TARGET, seconds, "Failed to seek: {}", e);
                false
            }
        }
    }

    async fn set_volume(&self, volume: f64) -> f64 {
        let requested = clamp_volume(volume);
        let level = if self.mixer.is_some() {
            apply_system_volume(self.mixer.as_ref(), requested).await
        } else {
            requested
        };
        let applied = self.apply_daemon_volume(level).await;
        self.volume
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .set(applied);
        applied
    }

    async fn volume(&self) -> f64 {
        self.volume.lock().unwrap_or_else(|p| p.into_inner()).level()
    }

    async fn is_muted(&self) -> bool {
        self.volume.lock().unwrap_or_else(|p| p.into_inner()).is_muted()
    }

    async fn toggle_mute(&self) -> bool {
        let target = self
            .volume
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .toggle_mute();
        apply_system_volume(self.mixer.as_ref(), target).await;
        self.apply_daemon_volume(target).await;
        self.is_muted().await
    }

    async fn status(&self) -> BackendStatus {
        let observed = self.request(&[]).await.ok();
        let current_file = lock_track(&self.track).path.clone();
        let has_backend_process = observed.is_some() || self.supervisor.owns_live_process().await;
        BackendStatus {
            is_playing: observed
                .as_ref()
                .map(|s| s.daemon_state() == DaemonState::Playing)
                .unwrap_or(false),
            current_file,
            has_backend_process,
            platform: platform(),
        }
    }

    async fn progress(&self) -> Option<ProgressSample> {
        let known = lock_track(&self.track).clone();
        known.path.as_ref()?;
        let status = self.request(&[]).await.ok()?;
        let reported = status.length_secs();
        Some(ProgressSample {
            position_secs: status.time.max(0.0),
            duration_secs: reported.or(known.duration_secs),
            duration_estimated: reported.is_none(),
            state: status.daemon_state(),
        })
    }

    fn set_track_complete_callback(&self, callback: CompletionCallback) {
        self.completion.set(callback);
    }

    fn clear_track_complete_callback(&self) {
        self.completion.clear();
    }

    async fn estimate_duration(&self, path: &str) -> f64 {
        estimate_duration(path).await
    }

    fn reports_duration(&self) -> bool {
        true
    }

    fn pushes_completion(&self) -> bool {
        false
    }

    fn process_name(&self) -> Option<String> {
        self.supervisor.launches().then(|| self.sweep_name())
    }

    async fn force_stop(&self) {
        self.forget_track();
        if let Err(e) = self.request(&[("command", "pl_stop".to_string())]).await {
            debug!(target: LOG_TARGET, "Force stop request failed: {}", e);
        }
    }

    async fn kill_all_processes(&self) {
        self.forget_track();
        self.supervisor.terminate().await;
        self.sweep_orphans().await;
    }

    async fn shutdown(&self) {
        info!(target: LOG_TARGET, "Shutting down HTTP daemon backend.");
        self.completion.clear();
        self.kill_all_processes().await;
    }
}
