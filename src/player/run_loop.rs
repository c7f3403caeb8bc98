// src/player/run_loop.rs
use super::{command_handler, Player, PlayerCommand, PLAYER_LOG_TARGET};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, trace};

/// Runs the player's command processing loop.
pub async fn run_player_loop(player: &mut Player) {
    info!(target: PLAYER_LOG_TARGET, state = ?player.state, "Player run loop started.");

    loop {
        let deferred_at = player
            .deferred_completion
            .as_ref()
            .map(|(_, at)| TokioInstant::from_std(*at));

        tokio::select! {
            biased; // Check commands first

            // --- Command Processing ---
            command = player.command_rx.recv() => {
                let Some(command) = command else {
                    info!(target: PLAYER_LOG_TARGET, "Command channel closed. Exiting run loop.");
                    command_handler::handle_shutdown(player).await;
                    break;
                };
                trace!(target: PLAYER_LOG_TARGET, command = command.name(), "Received command.");
                let (ok, reply) = match command {
                    PlayerCommand::Enqueue { info, reply } => (command_handler::handle_enqueue(player, info).await, reply),
                    PlayerCommand::RemoveAt { index, reply } => (command_handler::handle_remove_at(player, index).await, reply),
                    PlayerCommand::Reorder { from, to, reply } => (command_handler::handle_reorder(player, from, to).await, reply),
                    PlayerCommand::ClearQueue(reply) => (command_handler::handle_clear_queue(player).await, reply),
                    PlayerCommand::Play(reply) => (command_handler::handle_play(player).await, reply),
                    PlayerCommand::Pause(reply) => (command_handler::handle_pause(player).await, reply),
                    PlayerCommand::Resume(reply) => (command_handler::handle_resume(player).await, reply),
                    PlayerCommand::Stop(reply) => (command_handler::handle_stop(player).await, reply),
                    PlayerCommand::Skip(reply) => (command_handler::handle_skip(player).await, reply),
                    PlayerCommand::SeekTo { position, reply } => (command_handler::handle_seek(player, position).await, reply),
                    PlayerCommand::SetVolume { volume, reply } => (command_handler::handle_set_volume(player, volume).await, reply),
                    PlayerCommand::ToggleMute(reply) => (command_handler::handle_toggle_mute(player).await, reply),
                    PlayerCommand::Snapshot(reply) => (true, reply),
                    PlayerCommand::SelectBackend { kind, reply } => (command_handler::handle_select_backend(player, kind).await, reply),
                    PlayerCommand::Shutdown(reply) => {
                        command_handler::handle_shutdown(player).await;
                        let snapshot = player.snapshot().await;
                        let _ = reply.send(super::CommandReply { ok: true, snapshot });
                        info!(target: PLAYER_LOG_TARGET, "Shutdown command received. Exiting run loop.");
                        break;
                    }
                };
                let snapshot = player.snapshot().await;
                if reply.send(super::CommandReply { ok, snapshot }).is_err() {
                    debug!(target: PLAYER_LOG_TARGET, "Command caller went away before the reply.");
                }
            }

            // --- Track completion from any detection source ---
            Some(event) = player.completion_rx.recv() => {
                command_handler::handle_completion(player, event).await;
            }

            // --- Completion held back by the latch cooldown ---
            _ = tokio::time::sleep_until(deferred_at.unwrap_or_else(TokioInstant::now)), if deferred_at.is_some() => {
                if let Some((event, _)) = player.deferred_completion.take() {
                    debug!(target: PLAYER_LOG_TARGET, track_id = %event.track_id, "Retrying deferred completion.");
                    command_handler::handle_completion(player, event).await;
                }
            }
        }
    }

    info!(target: PLAYER_LOG_TARGET, "Player task cleanup complete.");
}
