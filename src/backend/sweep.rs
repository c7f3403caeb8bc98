//! System-wide process sweeps.
//!
//! Partial failures can leave player processes running that no adapter owns
//! any more. These helpers find them by exact process name and kill them.

use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "jukeboxd::backend::sweep";
const SWEEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Parses `pgrep` output (one pid per line).
pub fn parse_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

/// Lists pids whose process name is exactly `name`.
pub async fn list_pids(name: &str) -> Vec<u32> {
    let run = Command::new("pgrep").arg("-x").arg(name).output();
    match timeout(SWEEP_TIMEOUT, run).await {
        Ok(Ok(output)) => parse_pids(&String::from_utf8_lossy(&output.stdout)),
        Ok(Err(e)) => {
            warn!(target: LOG_TARGET, name, "pgrep failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!(target: LOG_TARGET, name, "pgrep timed out after {:?}", SWEEP_TIMEOUT);
            Vec::new()
        }
    }
}

pub async fn count_by_name(name: &str) -> usize {
    list_pids(name).await.len()
}

/// Kills every process named `name` except `keep`. Returns how many were signalled.
pub async fn kill_orphans(name: &str, keep: Option<u32>) -> usize {
    let own = std::process::id();
    let mut killed = 0;
    for pid in list_pids(name).await {
        if Some(pid) == keep || pid == own {
            continue;
        }
        match super::supervisor::signal_pid(pid, libc::SIGKILL) {
            Ok(()) => {
                info!(target: LOG_TARGET, name, pid, "Killed orphaned backend process.");
                killed += 1;
            }
            Err(e) => debug!(target: LOG_TARGET, name, pid, "Could not kill process: {}", e),
        }
    }
    killed
}

/// Kills every process named `name`.
pub async fn kill_by_name(name: &str) -> usize {
    kill_orphans(name, None).await
}
