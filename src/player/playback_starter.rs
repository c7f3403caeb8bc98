// src/player/playback_starter.rs
use super::progress_poller::{spawn_progress_poller, PollerContext};
use super::{bounded, CompletionEvent, PlaybackState, Player, PLAYER_LOG_TARGET};
use crate::backend::CompletionSource;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Routes the backend's completion callback for `track_id` into the player's
/// completion channel.
fn register_completion(player: &Player, track_id: &str) {
    let tx = player.completion_tx.clone();
    let track_id = track_id.to_string();
    player
        .backend
        .set_track_complete_callback(Arc::new(move |source: CompletionSource| {
            let event = CompletionEvent {
                track_id: track_id.clone(),
                source,
            };
            if tx.send(event).is_err() {
                debug!(target: PLAYER_LOG_TARGET, track_id = %track_id, "Completion channel closed, dropping event.");
            }
        }));
}

/// Starts the current track from the beginning.
/// Success leaves the player `Playing` with a poller running; failure leaves it
/// `Stalled` with the track kept as current.
#[instrument(skip(player), fields(track_id = player.current_track.as_ref().map(|t| t.id.as_str()).unwrap_or("")))]
pub async fn start_current(player: &mut Player) -> bool {
    let Some(track) = player.current_track.clone() else {
        return false;
    };
    player.cancel_poller().await;
    player.reset_progress().await;
    player.set_paused(false).await;
    register_completion(player, &track.id);

    let backend = player.backend.clone();
    let started = bounded(player.timings.backend_timeout, "play_file", backend.play_file(&track.path))
        .await
        .unwrap_or(false);

    if !started {
        warn!(target: PLAYER_LOG_TARGET, track_id = %track.id, path = %track.path, "Track failed to start, player stalled.");
        backend.clear_track_complete_callback();
        player.state = PlaybackState::Stalled;
        return false;
    }

    info!(target: PLAYER_LOG_TARGET, track_id = %track.id, title = %track.title, "Now playing.");
    player.state = PlaybackState::Playing;
    let completion_tx = (!backend.pushes_completion()).then(|| player.completion_tx.clone());
    player.poller = Some(spawn_progress_poller(PollerContext {
        backend,
        track_id: track.id,
        progress: player.current_progress.clone(),
        is_paused: player.is_paused.clone(),
        interval: player.timings.progress_interval,
        call_timeout: player.timings.backend_timeout,
        completion_tx,
    }));
    true
}

/// Moves to the next queued track, or to `Idle` when the queue is exhausted.
/// The new current track is persisted before playback is attempted.
#[instrument(skip(player), fields(queue_len = player.queue.len()))]
pub async fn advance(player: &mut Player) -> bool {
    player.cancel_poller().await;
    player.backend.clear_track_complete_callback();

    match player.queue.dequeue_next() {
        Some(track) => {
            debug!(target: PLAYER_LOG_TARGET, track_id = %track.id, "Advancing to next track.");
            player.current_track = Some(track);
            player.persist().await;
            start_current(player).await
        }
        None => {
            info!(target: PLAYER_LOG_TARGET, "Queue exhausted, stopping.");
            player.current_track = None;
            let backend = player.backend.clone();
            bounded(player.timings.backend_timeout, "stop", backend.stop()).await;
            player.state = PlaybackState::Idle;
            player.set_paused(false).await;
            player.reset_progress().await;
            player.persist().await;
            true
        }
    }
}
