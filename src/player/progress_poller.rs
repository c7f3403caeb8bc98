// src/player/progress_poller.rs

use super::progress::{PlaybackProgressInfo, SharedProgress};
use super::{CompletionEvent, PLAYER_LOG_TARGET};
use crate::backend::{CompletionSource, DaemonState, PlaybackBackend, ProgressSample};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace};

/// How long `stop` waits for the poller task before aborting it.
const POLLER_STOP_TIMEOUT: StdDuration = StdDuration::from_secs(2);

/// Decides from one sample whether the track has ended.
///
/// Only meaningful for backends without their own completion event, and only
/// for samples taken after playback was confirmed. An estimated duration never
/// ends a track; only the backend's state does.
pub fn completion_reached(sample: &ProgressSample) -> Option<CompletionSource> {
    if sample.state == DaemonState::Stopped {
        return Some(CompletionSource::DaemonStopped);
    }
    if sample.duration_estimated {
        return None;
    }
    match sample.duration_secs {
        Some(length) if length > 1.0 && sample.position_secs >= length - 1.0 => {
            Some(CompletionSource::PositionAtEnd)
        }
        Some(length) if length > 0.0 && sample.ratio() >= 0.999 => Some(CompletionSource::PositionAtEnd),
        _ => None,
    }
}

/// Everything one poller task needs.
pub struct PollerContext {
    pub backend: Arc<dyn PlaybackBackend>,
    pub track_id: String,
    pub progress: SharedProgress,
    pub is_paused: Arc<TokioMutex<bool>>,
    pub interval: StdDuration,
    pub call_timeout: StdDuration,
    /// Set when this poller is the completion authority for the track.
    pub completion_tx: Option<mpsc::UnboundedSender<CompletionEvent>>,
}

/// Manages a single progress poller task.
#[derive(Debug)]
pub struct PollerHandle {
    task_handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
    track_id: String,
}

impl PollerHandle {
    fn signal_shutdown(&mut self) {
        debug!(target: PLAYER_LOG_TARGET, track_id = %self.track_id, "Sending shutdown signal to progress poller.");
        if let Err(e) = self.shutdown_tx.send(()) {
            // Expected when the poller already exited after reporting completion.
            trace!(target: PLAYER_LOG_TARGET, track_id = %self.track_id, "Failed to send shutdown signal (receiver likely dropped): {}", e);
        }
    }

    #[instrument(skip(self), fields(track_id = %self.track_id))]
    async fn await_completion(mut self) {
        tokio::select! {
            biased;
            result = &mut self.task_handle => {
                match result {
                    Ok(()) => trace!(target: PLAYER_LOG_TARGET, track_id = %self.track_id, "Progress poller finished."),
                    Err(e) if e.is_panic() => {
                        error!(target: PLAYER_LOG_TARGET, track_id = %self.track_id, "Progress poller panicked: {:?}", e);
                    }
                    Err(e) => debug!(target: PLAYER_LOG_TARGET, track_id = %self.track_id, "Progress poller join error: {:?}", e),
                }
            }
            _ = tokio::time::sleep(POLLER_STOP_TIMEOUT) => {
                error!(target: PLAYER_LOG_TARGET, track_id = %self.track_id, "Timeout waiting for progress poller after {:?}. Aborting task.", POLLER_STOP_TIMEOUT);
                self.task_handle.abort();
            }
        }
    }

    /// Signals the poller and waits for it, aborting after a bounded wait.
    pub async fn stop(mut self) {
        self.signal_shutdown();
        self.await_completion().await;
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }
}

/// Spawns the poller for one successfully started track.
#[instrument(skip(ctx), fields(track_id = %ctx.track_id))]
pub fn spawn_progress_poller(ctx: PollerContext) -> PollerHandle {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let track_id = ctx.track_id.clone();

    info!(target: PLAYER_LOG_TARGET, interval = ?ctx.interval, decides_completion = ctx.completion_tx.is_some(), "Spawning progress poller.");
    let task_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
            }

            if *ctx.is_paused.lock().await {
                trace!(target: PLAYER_LOG_TARGET, track_id = %ctx.track_id, "Paused, skipping progress sample.");
                continue;
            }

            let sampled = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                sampled = tokio::time::timeout(ctx.call_timeout, ctx.backend.progress()) => sampled,
            };
            let sample = match sampled {
                Ok(Some(sample)) => sample,
                Ok(None) => continue,
                Err(_) => {
                    debug!(target: PLAYER_LOG_TARGET, track_id = %ctx.track_id, "Progress query timed out.");
                    continue;
                }
            };
            *ctx.progress.lock().await = PlaybackProgressInfo::from_sample(&sample);

            if let Some(tx) = &ctx.completion_tx {
                if let Some(source) = completion_reached(&sample) {
                    info!(target: PLAYER_LOG_TARGET, track_id = %ctx.track_id, ?source, position = sample.position_secs, "Poller detected end of track.");
                    if tx
                        .send(CompletionEvent {
                            track_id: ctx.track_id.clone(),
                            source,
                        })
                        .is_err()
                    {
                        debug!(target: PLAYER_LOG_TARGET, track_id = %ctx.track_id, "Completion channel closed.");
                    }
                    break;
                }
            }
        }
        trace!(target: PLAYER_LOG_TARGET, track_id = %ctx.track_id, "Progress poller exiting.");
    });

    PollerHandle {
        task_handle,
        shutdown_tx,
        track_id,
    }
}
