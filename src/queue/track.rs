use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Catalog metadata handed to `enqueue`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_label: Option<String>,
}

impl TrackInfo {
    pub fn from_path(path: impl Into<String>) -> Self {
        TrackInfo {
            path: path.into(),
            ..TrackInfo::default()
        }
    }
}

/// A queued or playing track. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub path: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_label: String,
}

impl Track {
    /// Builds a track with a fresh id. Missing titles fall back to the file stem.
    pub fn from_info(info: TrackInfo) -> Self {
        let title = info
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                Path::new(&info.path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| info.path.clone())
            });
        Track {
            id: Uuid::new_v4().to_string(),
            path: info.path,
            title,
            artist: info.artist.unwrap_or_default(),
            album: info.album.unwrap_or_default(),
            duration_label: info.duration_label.unwrap_or_default(),
        }
    }
}
