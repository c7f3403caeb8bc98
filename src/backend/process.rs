//! Process backend: one short-lived decoder process per track.
//!
//! Completion is the child's own exit. Pause and resume stop and continue the
//! process with signals; seeking is not possible.

use super::supervisor::{SupervisedChild, TERMINATE_TIMEOUT};
use super::volume::{apply_system_volume, SystemMixer, VolumeState};
use super::{
    ensure_readable, estimate_duration, platform, sweep, BackendKind, BackendStatus,
    CompletionCallback, CompletionSlot, CompletionSource, DaemonState, PlaybackBackend,
    ProgressSample,
};
use crate::config::ProcessSettings;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, error, info, instrument, warn};

const LOG_TARGET: &str = "jukeboxd::backend::process";

/// Placeholder in the argument template replaced by the track path.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Builds the argument list for one track. Appends the path when the template
/// has no placeholder.
pub fn build_args(template: &[String], path: &str) -> Vec<String> {
    let mut substituted = false;
    let mut args: Vec<String> = template
        .iter()
        .map(|arg| {
            if arg.contains(PATH_PLACEHOLDER) {
                substituted = true;
                arg.replace(PATH_PLACEHOLDER, path)
            } else {
                arg.clone()
            }
        })
        .collect();
    if !substituted {
        args.push(path.to_string());
    }
    args
}

/// Wall-clock playback position with pause accounting.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl PlaybackClock {
    pub fn start(now: Instant) -> Self {
        PlaybackClock {
            started: now,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(at);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }
}

struct ActiveTrack {
    path: String,
    duration_secs: f64,
    child: SupervisedChild,
    clock: PlaybackClock,
}

pub struct ProcessBackend {
    settings: ProcessSettings,
    mixer: Option<SystemMixer>,
    volume: Mutex<VolumeState>,
    completion: CompletionSlot,
    active: TokioMutex<Option<ActiveTrack>>,
}

impl ProcessBackend {
    pub fn new(settings: ProcessSettings, mixer: Option<SystemMixer>) -> Self {
        info!(target: LOG_TARGET, program = %settings.program, "Creating process backend.");
        ProcessBackend {
            settings,
            mixer,
            volume: Mutex::new(VolumeState::default()),
            completion: CompletionSlot::new(),
            active: TokioMutex::new(None),
        }
    }

    fn sweep_name(&self) -> String {
        self.settings.process_name.clone().unwrap_or_else(|| {
            Path::new(&self.settings.program)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&self.settings.program)
                .to_string()
        })
    }

    /// Kills the owned child, if any. Its exit never counts as completion.
    async fn stop_child(&self) -> bool {
        let previous = self.active.lock().await.take();
        match previous {
            Some(track) => {
                debug!(target: LOG_TARGET, path = %track.path, "Stopping decoder process.");
                track.child.terminate(TERMINATE_TIMEOUT).await;
                true
            }
            None => false,
        }
    }

    async fn sweep_orphans(&self) {
        if !self.settings.sweep_orphans {
            return;
        }
        let killed = sweep::kill_by_name(&self.sweep_name()).await;
        if killed > 0 {
            warn!(target: LOG_TARGET, killed, "Swept orphaned decoder processes.");
        }
    }

    fn record_volume(&self, applied: f64) {
        self.volume
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .set(applied);
    }
}

#[async_trait]
impl PlaybackBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    #[instrument(skip(self))]
    async fn play_file(&self, path: &str) -> bool {
        if let Err(e) = ensure_readable(path).await {
            warn!(target: LOG_TARGET, "Refusing to play: {}", e);
            return false;
        }
        self.stop().await;

        let args = build_args(&self.settings.args, path);
        let completion = self.completion.clone();
        let on_exit = Box::new(move || {
            completion.fire(CompletionSource::ProcessExit);
        });
        let child = match SupervisedChild::spawn("decoder", &self.settings.program, &args, on_exit) {
            Ok(child) => child,
            Err(e) => {
                error!(target: LOG_TARGET, program = %self.settings.program, "Failed to spawn decoder: {}", e);
                return false;
            }
        };

        tokio::time::sleep(Duration::from_millis(self.settings.grace_period_ms)).await;

        // Arm first, then look: whichever side clears the flag owns the exit.
        child.arm();
        if child.has_exited() {
            if child.disarm() {
                warn!(target: LOG_TARGET, path, "Decoder exited within the grace period.");
                return false;
            }
            // The exit hook already reported completion for this track.
            info!(target: LOG_TARGET, path, "Decoder finished right after the grace period.");
            return true;
        }

        let duration_secs = estimate_duration(path).await;
        *self.active.lock().await = Some(ActiveTrack {
            path: path.to_string(),
            duration_secs,
            child,
            clock: PlaybackClock::start(Instant::now()),
        });
        info!(target: LOG_TARGET, path, duration_secs, "Decoder process playing.");
        true
    }

    async fn stop(&self) -> bool {
        self.stop_child().await;
        self.sweep_orphans().await;
        true
    }

    async fn pause(&self) -> bool {
        let mut guard = self.active.lock().await;
        let Some(track) = guard.as_mut() else {
            return false;
        };
        match track.child.signal(libc::SIGSTOP) {
            Ok(()) => {
                track.clock.pause(Instant::now());
                true
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to pause decoder: {}", e);
                false
            }
        }
    }

    async fn resume(&self) -> bool {
        let mut guard = self.active.lock().await;
        let Some(track) = guard.as_mut() else {
            return false;
        };
        match track.child.signal(libc::SIGCONT) {
            Ok(()) => {
                track.clock.resume(Instant::now());
                true
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to resume decoder: {}", e);
                false
            }
        }
    }

    async fn seek(&self, position: f64) -> bool {
        debug!(target: LOG_TARGET, position, "Seek is not supported by the process backend.");
        false
    }

    async fn set_volume(&self, volume: f64) -> f64 {
        let applied = apply_system_volume(self.mixer.as_ref(), volume).await;
        self.record_volume(applied);
        applied
    }

    async fn volume(&self) -> f64 {
        if let Some(mixer) = &self.mixer {
            if let Ok(level) = mixer.read().await {
                let muted = self.is_muted().await;
                if !muted {
                    return level;
                }
            }
        }
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
        self.is_muted().await
    }

    async fn status(&self) -> BackendStatus {
        let guard = self.active.lock().await;
        match guard.as_ref() {
            Some(track) => {
                let alive = track.child.is_alive();
                BackendStatus {
                    is_playing: alive && !track.clock.is_paused(),
                    current_file: Some(track.path.clone()),
                    has_backend_process: alive,
                    platform: platform(),
                }
            }
            None => BackendStatus::idle(),
        }
    }

    async fn progress(&self) -> Option<ProgressSample> {
        let guard = self.active.lock().await;
        let track = guard.as_ref()?;
        let state = if !track.child.is_alive() {
            DaemonState::Stopped
        } else if track.clock.is_paused() {
            DaemonState::Paused
        } else {
            DaemonState::Playing
        };
        let position = track.clock.elapsed_at(Instant::now()).as_secs_f64();
        Some(ProgressSample {
            position_secs: position.min(track.duration_secs),
            duration_secs: Some(track.duration_secs),
            duration_estimated: true,
            state,
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
        false
    }

    fn pushes_completion(&self) -> bool {
        true
    }

    fn process_name(&self) -> Option<String> {
        self.settings.sweep_orphans.then(|| self.sweep_name())
    }

    async fn force_stop(&self) {
        self.stop_child().await;
    }

    async fn kill_all_processes(&self) {
        self.stop_child().await;
        self.sweep_orphans().await;
    }

    async fn shutdown(&self) {
        info!(target: LOG_TARGET, "Shutting down process backend.");
        self.completion.clear();
        self.kill_all_processes().await;
    }
}
