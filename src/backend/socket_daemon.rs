//! Socket daemon backend: MPD line protocol over TCP.
//!
//! Each operation opens its own connection, reads the greeting, sends one
//! command (or a command list) and reads `key: value` lines up to `OK`/`ACK`.

use super::supervisor::{
    confirm_playing, daemon_exit_hook, lock_track, DaemonLaunch, DaemonSupervisor, LoadedTrack,
    SharedTrack,
};
use super::volume::{apply_system_volume, clamp_volume, quantize, SystemMixer, VolumeState};
use super::{
    ensure_readable, estimate_duration, platform, sweep, BackendError, BackendKind, BackendStatus,
    CompletionCallback, CompletionSlot, DaemonState, PlaybackBackend, ProgressSample,
};
use crate::config::SocketDaemonSettings;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, instrument, trace, warn};

const LOG_TARGET: &str = "jukeboxd::backend::socket_daemon";

const GREETING_PREFIX: &str = "OK MPD ";
const STARTUP_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Quotes a command argument, escaping backslashes and double quotes.
pub fn quote_arg(arg: &str) -> String {
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Splits response lines into `key: value` pairs. Fails on an `ACK` line.
pub fn parse_response(lines: &[String]) -> Result<Vec<(String, String)>, BackendError> {
    let mut pairs = Vec::new();
    for line in lines {
        if line == "OK" {
            break;
        }
        if line.starts_with("ACK") {
            return Err(BackendError::ProtocolError(line.clone()));
        }
        if let Some((key, value)) = line.split_once(": ") {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    Ok(pairs)
}

/// Maps a local path to a daemon-relative URI by stripping the music root.
///
/// The daemon refuses absolute paths from network clients, so a path that is
/// not under the root cannot be played at all.
pub fn to_uri(music_root: Option<&Path>, path: &str) -> Result<String, BackendError> {
    let root = music_root.ok_or_else(|| {
        BackendError::FileUnreadable(format!(
            "{} cannot be sent to the socket daemon: no music_root configured",
            path
        ))
    })?;
    let relative = Path::new(path).strip_prefix(root).map_err(|_| {
        BackendError::FileUnreadable(format!("{} is outside the music root {}", path, root.display()))
    })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Fields of the `status` response we care about.
#[derive(Debug, Clone, PartialEq)]
pub struct MpdStatus {
    pub state: DaemonState,
    pub elapsed: Option<f64>,
    pub duration: Option<f64>,
    pub volume: Option<i64>,
}

impl MpdStatus {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut status = MpdStatus {
            state: DaemonState::Unknown,
            elapsed: None,
            duration: None,
            volume: None,
        };
        for (key, value) in pairs {
            match key.as_str() {
                "state" => {
                    status.state = match value.as_str() {
                        "play" => DaemonState::Playing,
                        "pause" => DaemonState::Paused,
                        "stop" => DaemonState::Stopped,
                        _ => DaemonState::Unknown,
                    }
                }
                "elapsed" => status.elapsed = value.parse().ok(),
                "duration" => status.duration = value.parse().ok(),
                // Older daemons only send `time: <elapsed>:<total>`.
                "time" => {
                    if let Some((elapsed, total)) = value.split_once(':') {
                        if status.elapsed.is_none() {
                            status.elapsed = elapsed.parse().ok();
                        }
                        if status.duration.is_none() {
                            status.duration = total.parse().ok();
                        }
                    }
                }
                "volume" => status.volume = value.parse().ok().filter(|v: &i64| *v >= 0),
                _ => {}
            }
        }
        status.duration = status.duration.filter(|d| *d > 0.0);
        status
    }
}

pub struct SocketDaemonBackend {
    settings: SocketDaemonSettings,
    mixer: Option<SystemMixer>,
    volume: Mutex<VolumeState>,
    completion: CompletionSlot,
    track: SharedTrack,
    supervisor: DaemonSupervisor,
}

impl SocketDaemonBackend {
    pub fn new(settings: SocketDaemonSettings, mixer: Option<SystemMixer>) -> Self {
        info!(target: LOG_TARGET, address = %settings.address, spawn = settings.spawn, "Creating socket daemon backend.");
        let completion = CompletionSlot::new();
        let track: SharedTrack = Arc::new(Mutex::new(LoadedTrack::default()));
        let launch = DaemonLaunch {
            spawn: settings.spawn,
            program: settings.program.clone(),
            args: settings.args.clone(),
            startup_retries: settings.startup_retries,
            retry_delay: STARTUP_RETRY_DELAY,
        };
        let supervisor = DaemonSupervisor::new(
            "socket-daemon",
            launch,
            daemon_exit_hook(track.clone(), completion.clone()),
        );
        SocketDaemonBackend {
            settings,
            mixer,
            volume: Mutex::new(VolumeState::default()),
            completion,
            track,
            supervisor,
        }
    }

    async fn exchange_inner(&self, commands: &[String]) -> Result<Vec<(String, String)>, BackendError> {
        let stream = TcpStream::connect(&self.settings.address).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut greeting = String::new();
        reader.read_line(&mut greeting).await?;
        if !greeting.starts_with(GREETING_PREFIX) {
            return Err(BackendError::ProtocolError(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        let mut payload = String::new();
        if commands.len() > 1 {
            payload.push_str("command_list_begin\n");
            for command in commands {
                payload.push_str(command);
                payload.push('\n');
            }
            payload.push_str("command_list_end\n");
        } else {
            for command in commands {
                payload.push_str(command);
                payload.push('\n');
            }
        }
        trace!(target: LOG_TARGET, ?commands, "Sending socket commands.");
        write_half.write_all(payload.as_bytes()).await?;
        write_half.flush().await?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                return Err(BackendError::ProtocolError("connection closed mid-response".to_string()));
            }
            let line = line.trim_end().to_string();
            let done = line == "OK" || line.starts_with("ACK");
            lines.push(line);
            if done {
                break;
            }
        }
        parse_response(&lines)
    }

    /// One connection, bounded by the request timeout.
    async fn exchange(&self, commands: &[String]) -> Result<Vec<(String, String)>, BackendError> {
        let limit = Duration::from_millis(self.settings.request_timeout_ms);
        tokio::time::timeout(limit, self.exchange_inner(commands)).await?
    }

    async fn is_reachable(&self) -> bool {
        self.exchange(&["ping".to_string()]).await.is_ok()
    }

    /// Sends commands, restarting an unresponsive daemon once before giving up.
    async fn command(&self, commands: &[String]) -> Result<Vec<(String, String)>, BackendError> {
        match self.exchange(commands).await {
            Ok(pairs) => Ok(pairs),
            Err(BackendError::ProtocolError(ack)) => Err(BackendError::ProtocolError(ack)),
            Err(first) => {
                warn!(target: LOG_TARGET, "Socket request failed, checking daemon: {}", first);
                if !self.supervisor.ensure_running(|| self.is_reachable()).await {
                    return Err(BackendError::NotRunning(format!(
                        "socket daemon at {} is unavailable",
                        self.settings.address
                    )));
                }
                self.exchange(commands).await
            }
        }
    }

    async fn query_status(&self) -> Result<MpdStatus, BackendError> {
        let pairs = self.exchange(&["status".to_string()]).await?;
        Ok(MpdStatus::from_pairs(&pairs))
    }

    async fn sample_state(&self) -> Option<DaemonState> {
        self.query_status().await.ok().map(|s| s.state)
    }

    fn sweep_name(&self) -> String {
        Path::new(&self.settings.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.settings.program)
            .to_string()
    }

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

    async fn apply_daemon_volume(&self, level: f64) -> f64 {
        let (raw, applied) = quantize(level, 0, 100);
        if let Err(e) = self.command(&[format!("setvol {}", raw)]).await {
            // Daemons without a mixer answer setvol with an ACK.
            debug!(target: LOG_TARGET, "Failed to set daemon volume: {}", e);
        }
        applied
    }

    async fn simple(&self, command: &str) -> bool {
        match self.command(&[command.to_string()]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(target: LOG_TARGET, command, "Socket command failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl PlaybackBackend for SocketDaemonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SocketDaemon
    }

    #[instrument(skip(self))]
    async fn play_file(&self, path: &str) -> bool {
        if let Err(e) = ensure_readable(path).await {
            warn!(target: LOG_TARGET, "Refusing to play: {}", e);
            return false;
        }
        let uri = match to_uri(self.settings.music_root.as_deref(), path) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(target: LOG_TARGET, "Refusing to play: {}", e);
                return false;
            }
        };
        if !self.supervisor.ensure_running(|| self.is_reachable()).await {
            error!(target: LOG_TARGET, "Socket daemon unavailable, cannot play.");
            return false;
        }

        self.forget_track();
        let commands = vec![
            "stop".to_string(),
            "clear".to_string(),
            format!("add {}", quote_arg(&uri)),
            "play".to_string(),
        ];
        if let Err(e) = self.command(&commands).await {
            error!(target: LOG_TARGET, %uri, "Daemon rejected load: {}", e);
            return false;
        }

        let confirm_within = Duration::from_millis(self.settings.confirm_timeout_ms);
        if !confirm_playing(confirm_within, || self.sample_state()).await {
            warn!(target: LOG_TARGET, path, "Daemon did not report playing in time.");
            return false;
        }

        let reported = self.query_status().await.ok().and_then(|s| s.duration);
        let duration_secs = match reported {
            Some(d) => d,
            None => estimate_duration(path).await,
        };
        *lock_track(&self.track) = LoadedTrack {
            path: Some(path.to_string()),
            duration_secs: Some(duration_secs),
            playing: true,
        };
        info!(target: LOG_TARGET, path, %uri, duration_secs, "Socket daemon playing.");
        true
    }

    async fn stop(&self) -> bool {
        self.forget_track();
        if let Err(e) = self.exchange(&["stop".to_string()]).await {
            debug!(target: LOG_TARGET, "Stop request failed: {}", e);
        }
        self.sweep_orphans().await;
        true
    }

    async fn pause(&self) -> bool {
        let ok = self.simple("pause 1").await;
        if ok {
            lock_track(&self.track).playing = false;
        }
        ok
    }

    async fn resume(&self) -> bool {
        let ok = self.simple("pause 0").await;
        if ok {
            let mut track = lock_track(&self.track);
            track.playing = track.path.is_some();
        }
        ok
    }

    async fn seek(&self, position: f64) -> bool {
        let known = lock_track(&self.track).duration_secs;
        let duration = match known {
            Some(d) => d,
            None => match self.query_status().await.ok().and_then(|s| s.duration) {
                Some(d) => d,
                None => return false,
            },
        };
        let seconds = position.clamp(0.0, 1.0) * duration;
        self.simple(&format!("seekcur {:.3}", seconds)).await
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
        let observed = self.query_status().await.ok();
        let current_file = lock_track(&self.track).path.clone();
        let has_backend_process = observed.is_some() || self.supervisor.owns_live_process().await;
        BackendStatus {
            is_playing: observed
                .as_ref()
                .map(|s| s.state == DaemonState::Playing)
                .unwrap_or(false),
            current_file,
            has_backend_process,
            platform: platform(),
        }
    }

    async fn progress(&self) -> Option<ProgressSample> {
        let known = lock_track(&self.track).clone();
        known.path.as_ref()?;
        let status = self.query_status().await.ok()?;
        Some(ProgressSample {
            position_secs: status.elapsed.unwrap_or(0.0),
            duration_secs: status.duration.or(known.duration_secs),
            duration_estimated: status.duration.is_none(),
            state: status.state,
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
        if let Err(e) = self.exchange(&["stop".to_string()]).await {
            debug!(target: LOG_TARGET, "Force stop request failed: {}", e);
        }
    }

    async fn kill_all_processes(&self) {
        self.forget_track();
        self.supervisor.terminate().await;
        self.sweep_orphans().await;
    }

    async fn shutdown(&self) {
        info!(target: LOG_TARGET, "Shutting down socket daemon backend.");
        self.completion.clear();
        self.kill_all_processes().await;
    }
}
