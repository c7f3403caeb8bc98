//! Application settings and configuration management

use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Backend selected at startup
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Directory for playback state and play counts (defaults to the user data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Persisted state older than this is ignored at startup
    #[serde(default = "default_state_freshness_hours")]
    pub state_freshness_hours: u64,
    /// How long the completion latch stays closed after a track finishes
    #[serde(default = "default_completion_cooldown_ms")]
    pub completion_cooldown_ms: u64,
    /// Progress poller interval
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Upper bound for any single backend call made by the orchestrator
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,
    #[serde(default)]
    pub process: ProcessSettings,
    #[serde(default)]
    pub http_daemon: HttpDaemonSettings,
    #[serde(default)]
    pub socket_daemon: SocketDaemonSettings,
    #[serde(default)]
    pub mixer: MixerSettings,
}

/// One decoder process per track.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProcessSettings {
    /// Player executable
    #[serde(default = "default_process_program")]
    pub program: String,
    /// Argument template; `{path}` is replaced by the track path
    #[serde(default = "default_process_args")]
    pub args: Vec<String>,
    /// Name used for orphan sweeps (defaults to the program's file name)
    #[serde(default)]
    pub process_name: Option<String>,
    /// The process must survive this long for a play to count as started
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Kill stray processes with the same name on stop
    #[serde(default = "default_true")]
    pub sweep_orphans: bool,
}

/// Long-lived media daemon with an HTTP control interface.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HttpDaemonSettings {
    #[serde(default = "default_local_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_password")]
    pub password: String,
    /// Launch and supervise the daemon when it is not reachable
    #[serde(default = "default_true")]
    pub spawn: bool,
    #[serde(default = "default_http_program")]
    pub program: String,
    /// Extra arguments appended after the control-interface arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_startup_retries")]
    pub startup_retries: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long to wait for the daemon to report `playing` after a load
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

/// Daemon speaking a line protocol over TCP.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SocketDaemonSettings {
    #[serde(default = "default_socket_address")]
    pub address: String,
    /// The daemon's music directory. Track paths are sent relative to it;
    /// tracks outside it cannot be played on this backend.
    #[serde(default = "default_music_root")]
    pub music_root: Option<PathBuf>,
    #[serde(default)]
    pub spawn: bool,
    #[serde(default = "default_socket_program")]
    pub program: String,
    #[serde(default = "default_socket_args")]
    pub args: Vec<String>,
    #[serde(default = "default_startup_retries")]
    pub startup_retries: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

/// ALSA simple mixer used as the system volume control.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MixerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mixer_card")]
    pub card: String,
    #[serde(default = "default_mixer_control")]
    pub control: String,
}

fn default_backend() -> BackendKind {
    BackendKind::Process
}

fn default_state_freshness_hours() -> u64 {
    24
}

fn default_completion_cooldown_ms() -> u64 {
    1500
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_backend_timeout_ms() -> u64 {
    10_000
}

fn default_process_program() -> String {
    "mpg123".to_string()
}

fn default_process_args() -> Vec<String> {
    vec!["-q".to_string(), "{path}".to_string()]
}

fn default_grace_period_ms() -> u64 {
    400
}

fn default_true() -> bool {
    true
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_password() -> String {
    "jukebox".to_string()
}

fn default_http_program() -> String {
    "vlc".to_string()
}

fn default_startup_retries() -> u32 {
    20
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_confirm_timeout_ms() -> u64 {
    3000
}

fn default_socket_address() -> String {
    "127.0.0.1:6600".to_string()
}

fn default_music_root() -> Option<PathBuf> {
    dirs::audio_dir()
}

fn default_socket_program() -> String {
    "mpd".to_string()
}

fn default_socket_args() -> Vec<String> {
    vec!["--no-daemon".to_string()]
}

fn default_mixer_card() -> String {
    "default".to_string()
}

fn default_mixer_control() -> String {
    "Master".to_string()
}

impl Default for ProcessSettings {
    fn default() -> Self {
        ProcessSettings {
            program: default_process_program(),
            args: default_process_args(),
            process_name: None,
            grace_period_ms: default_grace_period_ms(),
            sweep_orphans: true,
        }
    }
}

impl Default for HttpDaemonSettings {
    fn default() -> Self {
        HttpDaemonSettings {
            host: default_local_host(),
            port: default_http_port(),
            password: default_http_password(),
            spawn: true,
            program: default_http_program(),
            extra_args: Vec::new(),
            startup_retries: default_startup_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

impl HttpDaemonSettings {
    /// Base URL of the control interface.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Arguments that start the daemon with its HTTP interface enabled.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--intf".to_string(),
            "http".to_string(),
            "--http-host".to_string(),
            self.host.clone(),
            "--http-port".to_string(),
            self.port.to_string(),
            "--http-password".to_string(),
            self.password.clone(),
            "--no-video".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl Default for SocketDaemonSettings {
    fn default() -> Self {
        SocketDaemonSettings {
            address: default_socket_address(),
            music_root: default_music_root(),
            spawn: false,
            program: default_socket_program(),
            args: default_socket_args(),
            startup_retries: default_startup_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

impl Default for MixerSettings {
    fn default() -> Self {
        MixerSettings {
            enabled: false,
            card: default_mixer_card(),
            control: default_mixer_control(),
        }
    }
}

/// Error types for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    ParseError(String),
    ValidationError(String),
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(s) => write!(f, "Parse error: {}", s),
            ConfigError::ValidationError(s) => write!(f, "Validation error: {}", s),
        }
    }
}

impl Error for ConfigError {}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            backend: default_backend(),
            data_dir: None,
            state_freshness_hours: default_state_freshness_hours(),
            completion_cooldown_ms: default_completion_cooldown_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            backend_timeout_ms: default_backend_timeout_ms(),
            process: ProcessSettings::default(),
            http_daemon: HttpDaemonSettings::default(),
            socket_daemon: SocketDaemonSettings::default(),
            mixer: MixerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(&self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config").join("jukeboxd").join("config.json")
    }

    /// Directory holding playback state and play counts
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("jukeboxd")
        })
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.data_dir().join("playback_state.json")
    }

    pub fn play_counts_path(&self) -> PathBuf {
        self.data_dir().join("play_counts.json")
    }

    pub fn state_freshness(&self) -> Duration {
        Duration::from_secs(self.state_freshness_hours * 3600)
    }

    pub fn completion_cooldown(&self) -> Duration {
        Duration::from_millis(self.completion_cooldown_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "progress_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.backend_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "backend_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.process.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "process.program cannot be empty".to_string(),
            ));
        }
        if self.http_daemon.port == 0 {
            return Err(ConfigError::ValidationError(
                "http_daemon.port cannot be zero".to_string(),
            ));
        }
        if self.socket_daemon.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "socket_daemon.address cannot be empty".to_string(),
            ));
        }
        if self.backend == BackendKind::SocketDaemon && self.socket_daemon.music_root.is_none() {
            return Err(ConfigError::ValidationError(
                "socket_daemon.music_root must be set to use the socket_daemon backend".to_string(),
            ));
        }
        Ok(())
    }
}
