use std::path::Path;
use tracing::debug;

const LOG_TARGET: &str = "jukeboxd::backend::duration";

/// Used when the file cannot be inspected at all.
pub const DEFAULT_DURATION_SECS: f64 = 180.0;

/// Approximate stream byte rate per container, in bytes per second.
fn bytes_per_second(extension: &str) -> f64 {
    match extension {
        "mp3" => 16_000.0,          // 128 kbit/s
        "ogg" | "opus" => 20_000.0, // ~160 kbit/s
        "m4a" | "aac" => 32_000.0,  // 256 kbit/s
        "flac" => 110_000.0,
        "wav" | "aiff" | "aif" => 176_400.0, // 16-bit stereo 44.1 kHz
        _ => 24_000.0,
    }
}

/// Estimates a duration from the file size and extension. Never below one second.
pub fn estimate_from_size(size_bytes: u64, extension: Option<&str>) -> f64 {
    let ext = extension.map(|e| e.to_ascii_lowercase()).unwrap_or_default();
    let secs = size_bytes as f64 / bytes_per_second(&ext);
    secs.max(1.0)
}

/// File-size heuristic over the file at `path`.
pub async fn estimate_duration(path: &str) -> f64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            let ext = Path::new(path).extension().and_then(|e| e.to_str());
            let secs = estimate_from_size(meta.len(), ext);
            debug!(target: LOG_TARGET, path, secs, "Estimated duration from file size.");
            secs
        }
        Err(e) => {
            debug!(target: LOG_TARGET, path, "Cannot stat file for duration estimate: {}", e);
            DEFAULT_DURATION_SECS
        }
    }
}
