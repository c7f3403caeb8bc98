use super::playback_starter::{advance, start_current};
use super::{bounded, CompletionEvent, LatchDecision, PlaybackState, Player, PLAYER_LOG_TARGET};
use crate::backend::{BackendKind, DaemonState};
use crate::queue::{Track, TrackInfo};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

#[instrument(skip(player, info), fields(path = %info.path))]
pub async fn handle_enqueue(player: &mut Player, info: TrackInfo) -> bool {
    let track = Track::from_info(info);
    info!(target: PLAYER_LOG_TARGET, track_id = %track.id, title = %track.title, "Track enqueued.");
    player.queue.enqueue(track);
    player.persist().await;

    if matches!(player.state, PlaybackState::Idle | PlaybackState::Stalled) {
        advance(player).await;
    }
    true
}

#[instrument(skip(player))]
pub async fn handle_remove_at(player: &mut Player, index: usize) -> bool {
    match player.queue.remove_at(index) {
        Some(track) => {
            debug!(target: PLAYER_LOG_TARGET, track_id = %track.id, "Removed track from queue.");
            player.persist().await;
            true
        }
        None => {
            debug!(target: PLAYER_LOG_TARGET, len = player.queue.len(), "Remove index out of range.");
            false
        }
    }
}

#[instrument(skip(player))]
pub async fn handle_reorder(player: &mut Player, from: usize, to: usize) -> bool {
    if !player.queue.reorder(from, to) {
        debug!(target: PLAYER_LOG_TARGET, len = player.queue.len(), "Reorder indices out of range.");
        return false;
    }
    player.persist().await;
    true
}

#[instrument(skip(player))]
pub async fn handle_clear_queue(player: &mut Player) -> bool {
    info!(target: PLAYER_LOG_TARGET, cleared = player.queue.len(), "Clearing queue.");
    player.queue.clear();
    player.persist().await;
    true
}

#[instrument(skip(player), fields(state = ?player.state))]
pub async fn handle_play(player: &mut Player) -> bool {
    match player.state {
        PlaybackState::Playing => true,
        PlaybackState::Paused => handle_resume(player).await,
        PlaybackState::Stalled => start_current(player).await,
        PlaybackState::Idle => {
            if player.queue.is_empty() {
                debug!(target: PLAYER_LOG_TARGET, "Play requested with an empty queue.");
                false
            } else {
                advance(player).await
            }
        }
        PlaybackState::Stopping => false,
    }
}

#[instrument(skip(player), fields(state = ?player.state))]
pub async fn handle_pause(player: &mut Player) -> bool {
    if player.state != PlaybackState::Playing {
        return false;
    }
    let backend = player.backend.clone();
    let paused = bounded(player.timings.backend_timeout, "pause", backend.pause())
        .await
        .unwrap_or(false);
    if paused {
        player.state = PlaybackState::Paused;
        player.set_paused(true).await;
    }
    paused
}

/// Resumes a paused track. Without a current track this starts the next one.
#[instrument(skip(player), fields(state = ?player.state))]
pub async fn handle_resume(player: &mut Player) -> bool {
    if player.current_track.is_none() {
        return advance(player).await;
    }
    match player.state {
        PlaybackState::Paused => {
            let backend = player.backend.clone();
            let resumed = bounded(player.timings.backend_timeout, "resume", backend.resume())
                .await
                .unwrap_or(false);
            if resumed {
                player.state = PlaybackState::Playing;
                player.set_paused(false).await;
            }
            resumed
        }
        PlaybackState::Stalled => start_current(player).await,
        PlaybackState::Playing => true,
        PlaybackState::Idle | PlaybackState::Stopping => false,
    }
}

#[instrument(skip(player), fields(state = ?player.state))]
pub async fn handle_stop(player: &mut Player) -> bool {
    player.state = PlaybackState::Stopping;
    player.backend.clear_track_complete_callback();
    player.cancel_poller().await;

    let backend = player.backend.clone();
    let stopped = bounded(player.timings.backend_timeout, "stop", backend.stop())
        .await
        .unwrap_or(false);
    if !stopped {
        warn!(target: PLAYER_LOG_TARGET, "Backend did not confirm stop.");
    }

    player.current_track = None;
    player.deferred_completion = None;
    player.persist().await;
    player.state = PlaybackState::Idle;
    player.set_paused(false).await;
    player.reset_progress().await;
    info!(target: PLAYER_LOG_TARGET, "Playback stopped.");
    true
}

#[instrument(skip(player))]
pub async fn handle_skip(player: &mut Player) -> bool {
    info!(target: PLAYER_LOG_TARGET, remaining = player.queue.len(), "Skipping track.");
    advance(player).await
}

#[instrument(skip(player))]
pub async fn handle_seek(player: &mut Player, position: f64) -> bool {
    if player.current_track.is_none() {
        return false;
    }
    let position = if position.is_nan() { 0.0 } else { position.clamp(0.0, 1.0) };
    let backend = player.backend.clone();
    let limit = player.timings.backend_timeout;
    let sought = bounded(limit, "seek", backend.seek(position)).await.unwrap_or(false);
    if !sought || !backend.reports_duration() {
        return sought;
    }

    // Resync with what the backend actually did.
    if let Some(Some(sample)) = bounded(limit, "progress", backend.progress()).await {
        match sample.state {
            DaemonState::Playing if player.state == PlaybackState::Paused => {
                player.state = PlaybackState::Playing;
                player.set_paused(false).await;
            }
            DaemonState::Paused if player.state == PlaybackState::Playing => {
                player.state = PlaybackState::Paused;
                player.set_paused(true).await;
            }
            _ => {}
        }
        *player.current_progress.lock().await = super::PlaybackProgressInfo::from_sample(&sample);
    }
    true
}

#[instrument(skip(player))]
pub async fn handle_set_volume(player: &mut Player, volume: f64) -> bool {
    let backend = player.backend.clone();
    match bounded(player.timings.backend_timeout, "set_volume", backend.set_volume(volume)).await {
        Some(applied) => {
            debug!(target: PLAYER_LOG_TARGET, requested = volume, applied, "Volume set.");
            true
        }
        None => false,
    }
}

#[instrument(skip(player))]
pub async fn handle_toggle_mute(player: &mut Player) -> bool {
    let backend = player.backend.clone();
    match bounded(player.timings.backend_timeout, "toggle_mute", backend.toggle_mute()).await {
        Some(muted) => {
            debug!(target: PLAYER_LOG_TARGET, muted, "Mute toggled.");
            true
        }
        None => false,
    }
}

/// Swaps the active backend. A playing or paused track restarts from the
/// beginning on the new one.
#[instrument(skip(player), fields(from = %player.backend_kind))]
pub async fn handle_select_backend(player: &mut Player, kind: BackendKind) -> bool {
    if kind == player.backend_kind {
        return true;
    }
    let restart = matches!(player.state, PlaybackState::Playing | PlaybackState::Paused);
    player.cancel_poller().await;
    player.backend.clear_track_complete_callback();
    player.deferred_completion = None;

    let limit = player.timings.backend_timeout;
    player.backend = match bounded(limit, "select_backend", player.selector.select(kind)).await {
        Some(backend) => backend,
        None => {
            // The previous adapter is already detached, so this only builds the new one.
            warn!(target: PLAYER_LOG_TARGET, to = %kind, "Previous backend did not tear down in time, activating anyway.");
            player.selector.select(kind).await
        }
    };
    player.backend_kind = kind;
    info!(target: PLAYER_LOG_TARGET, to = %kind, restart, "Backend switched.");

    let ok = if restart {
        start_current(player).await
    } else {
        if player.current_track.is_some() {
            player.state = PlaybackState::Stalled;
        }
        true
    };
    player.persist().await;
    ok
}

/// Stops audio and releases the backend, keeping queue and current track on
/// disk for the next start.
#[instrument(skip(player))]
pub async fn handle_shutdown(player: &mut Player) {
    info!(target: PLAYER_LOG_TARGET, "Shutting down player.");
    player.cancel_poller().await;
    player.backend.clear_track_complete_callback();
    let backend = player.backend.clone();
    bounded(player.timings.backend_timeout, "stop", backend.stop()).await;
    player.state = if player.current_track.is_some() {
        PlaybackState::Stalled
    } else {
        PlaybackState::Idle
    };
    player.set_paused(false).await;
    player.persist().await;
    player.selector.shutdown().await;
}

/// Handles a track-finished event from any detection source.
#[instrument(skip(player, event), fields(track_id = %event.track_id, source = ?event.source))]
pub async fn handle_completion(player: &mut Player, event: CompletionEvent) {
    if player.latch.is_completed(&event.track_id) {
        debug!(target: PLAYER_LOG_TARGET, "Duplicate completion ignored.");
        return;
    }
    let is_current = player
        .current_track
        .as_ref()
        .map(|t| t.id == event.track_id)
        .unwrap_or(false);
    if !is_current || !matches!(player.state, PlaybackState::Playing | PlaybackState::Paused) {
        debug!(target: PLAYER_LOG_TARGET, state = ?player.state, "Stale completion ignored.");
        return;
    }

    let now = Instant::now();
    match player.latch.try_acquire(&event.track_id, now) {
        LatchDecision::Defer(wait) => {
            debug!(target: PLAYER_LOG_TARGET, ?wait, "Completion deferred until the latch releases.");
            player.deferred_completion = Some((event, now + wait));
        }
        LatchDecision::Acquire => {
            player.deferred_completion = None;
            if let Some(track) = player.current_track.clone() {
                info!(target: PLAYER_LOG_TARGET, title = %track.title, "Track finished.");
                let recorder = player.recorder.clone();
                tokio::spawn(async move {
                    if let Err(e) = recorder.record_play(&track.path).await {
                        warn!(target: PLAYER_LOG_TARGET, path = %track.path, "Failed to record play: {}", e);
                    }
                });
            }
            advance(player).await;
        }
    }
}
