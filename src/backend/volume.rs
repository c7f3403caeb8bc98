//! Volume bookkeeping shared by all adapters, plus the ALSA system mixer.

use super::error::BackendError;
use alsa::mixer::{Mixer, SelemChannelId, SelemId};
use tokio::task;
use tracing::{debug, warn};

const LOG_TARGET: &str = "jukeboxd::backend::volume";

/// Clamps a requested volume into [0,1]. NaN maps to silence.
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// Volume level with mute memory.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeState {
    level: f64,
    muted: bool,
    pre_mute: f64,
}

impl VolumeState {
    pub fn new(level: f64) -> Self {
        let level = clamp_volume(level);
        VolumeState {
            level,
            muted: level == 0.0,
            pre_mute: if level > 0.0 { level } else { 1.0 },
        }
    }

    /// Records an applied volume. Zero implies muted.
    pub fn set(&mut self, applied: f64) {
        let applied = clamp_volume(applied);
        if applied == 0.0 {
            if self.level > 0.0 {
                self.pre_mute = self.level;
            }
            self.muted = true;
        } else {
            self.muted = false;
            self.pre_mute = applied;
        }
        self.level = applied;
    }

    /// Flips mute and returns the level that should now be applied.
    pub fn toggle_mute(&mut self) -> f64 {
        if self.muted {
            self.muted = false;
            self.level = self.pre_mute;
        } else {
            if self.level > 0.0 {
                self.pre_mute = self.level;
            }
            self.muted = true;
            self.level = 0.0;
        }
        self.level
    }

    /// Effective output level (0 while muted).
    pub fn level(&self) -> f64 {
        if self.muted {
            0.0
        } else {
            self.level
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

impl Default for VolumeState {
    fn default() -> Self {
        VolumeState::new(1.0)
    }
}

/// Maps a normalized volume onto an integer mixer range and back.
/// Returns the raw value and the fraction it actually represents.
pub fn quantize(volume: f64, min: i64, max: i64) -> (i64, f64) {
    let volume = clamp_volume(volume);
    if max <= min {
        return (min, volume);
    }
    let span = (max - min) as f64;
    let raw = min + (span * volume).round() as i64;
    (raw, (raw - min) as f64 / span)
}

/// ALSA simple-mixer element acting as the system volume control.
#[derive(Debug, Clone)]
pub struct SystemMixer {
    card: String,
    control: String,
}

impl SystemMixer {
    pub fn new(card: &str, control: &str) -> Self {
        SystemMixer {
            card: card.to_string(),
            control: control.to_string(),
        }
    }

    fn apply_blocking(card: &str, control: &str, volume: f64) -> Result<f64, BackendError> {
        let mixer = Mixer::new(card, false)?;
        let selem = mixer
            .find_selem(&SelemId::new(control, 0))
            .ok_or_else(|| BackendError::MixerError(format!("No mixer control '{}' on '{}'", control, card)))?;
        let (min, max) = selem.get_playback_volume_range();
        let (raw, applied) = quantize(volume, min, max);
        selem.set_playback_volume_all(raw)?;
        if selem.has_playback_switch() {
            selem.set_playback_switch_all(if raw > min { 1 } else { 0 })?;
        }
        Ok(applied)
    }

    fn read_blocking(card: &str, control: &str) -> Result<f64, BackendError> {
        let mixer = Mixer::new(card, false)?;
        let selem = mixer
            .find_selem(&SelemId::new(control, 0))
            .ok_or_else(|| BackendError::MixerError(format!("No mixer control '{}' on '{}'", control, card)))?;
        let (min, max) = selem.get_playback_volume_range();
        let raw = selem.get_playback_volume(SelemChannelId::FrontLeft)?;
        if max <= min {
            return Ok(1.0);
        }
        Ok(clamp_volume((raw - min) as f64 / (max - min) as f64))
    }

    /// Sets the system volume, returning the quantized level applied.
    pub async fn apply(&self, volume: f64) -> Result<f64, BackendError> {
        let card = self.card.clone();
        let control = self.control.clone();
        task::spawn_blocking(move || Self::apply_blocking(&card, &control, volume))
            .await
            .map_err(|e| BackendError::MixerError(format!("Mixer task failed: {}", e)))?
    }

    pub async fn read(&self) -> Result<f64, BackendError> {
        let card = self.card.clone();
        let control = self.control.clone();
        task::spawn_blocking(move || Self::read_blocking(&card, &control))
            .await
            .map_err(|e| BackendError::MixerError(format!("Mixer task failed: {}", e)))?
    }
}

/// Applies `requested` to the system mixer when one is configured.
/// Falls back to the clamped request when there is no mixer or it fails.
pub async fn apply_system_volume(mixer: Option<&SystemMixer>, requested: f64) -> f64 {
    let clamped = clamp_volume(requested);
    let Some(mixer) = mixer else {
        return clamped;
    };
    match mixer.apply(clamped).await {
        Ok(applied) => {
            debug!(target: LOG_TARGET, requested, applied, "System mixer volume applied.");
            applied
        }
        Err(e) => {
            warn!(target: LOG_TARGET, "System mixer unavailable, keeping software volume: {}", e);
            clamped
        }
    }
}
