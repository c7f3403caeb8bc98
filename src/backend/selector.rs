//! Owns the active backend adapter and swaps it safely.

use super::http_daemon::HttpDaemonBackend;
use super::process::ProcessBackend;
use super::socket_daemon::SocketDaemonBackend;
use super::volume::SystemMixer;
use super::{sweep, BackendKind, PlaybackBackend};
use crate::config::Settings;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const LOG_TARGET: &str = "jukeboxd::backend::selector";

/// Builds adapters on demand.
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: BackendKind) -> Arc<dyn PlaybackBackend>;
}

/// Builds the real adapters from application settings.
pub struct DefaultBackendFactory {
    settings: Settings,
}

impl DefaultBackendFactory {
    pub fn new(settings: Settings) -> Self {
        DefaultBackendFactory { settings }
    }

    fn mixer(&self) -> Option<SystemMixer> {
        let mixer = &self.settings.mixer;
        mixer
            .enabled
            .then(|| SystemMixer::new(&mixer.card, &mixer.control))
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, kind: BackendKind) -> Arc<dyn PlaybackBackend> {
        match kind {
            BackendKind::Process => Arc::new(ProcessBackend::new(self.settings.process.clone(), self.mixer())),
            BackendKind::HttpDaemon => Arc::new(HttpDaemonBackend::new(
                self.settings.http_daemon.clone(),
                self.mixer(),
            )),
            BackendKind::SocketDaemon => Arc::new(SocketDaemonBackend::new(
                self.settings.socket_daemon.clone(),
                self.mixer(),
            )),
        }
    }
}

/// Holds the single active adapter.
pub struct BackendSelector {
    factory: Box<dyn BackendFactory>,
    active: Option<(BackendKind, Arc<dyn PlaybackBackend>)>,
}

impl BackendSelector {
    pub fn new(factory: Box<dyn BackendFactory>) -> Self {
        BackendSelector {
            factory,
            active: None,
        }
    }

    pub fn active_kind(&self) -> Option<BackendKind> {
        self.active.as_ref().map(|(kind, _)| *kind)
    }

    pub fn active(&self) -> Option<Arc<dyn PlaybackBackend>> {
        self.active.as_ref().map(|(_, backend)| backend.clone())
    }

    /// Returns the adapter for `kind`, tearing the previous one down completely
    /// before the new one is constructed.
    #[instrument(skip(self))]
    pub async fn select(&mut self, kind: BackendKind) -> Arc<dyn PlaybackBackend> {
        if let Some((active_kind, backend)) = &self.active {
            if *active_kind == kind {
                return backend.clone();
            }
        }

        if let Some((old_kind, old)) = self.active.take() {
            info!(target: LOG_TARGET, from = %old_kind, to = %kind, "Switching backend.");
            old.clear_track_complete_callback();
            old.force_stop().await;
            old.kill_all_processes().await;
            if let Some(name) = old.process_name() {
                let swept = sweep::kill_by_name(&name).await;
                if swept > 0 {
                    warn!(target: LOG_TARGET, name = %name, swept, "Killed leftover processes of the previous backend.");
                }
            }
            old.shutdown().await;
        }

        let backend = self.factory.create(kind);
        info!(target: LOG_TARGET, kind = %kind, "Backend activated.");
        self.active = Some((kind, backend.clone()));
        backend
    }

    /// Shuts the active adapter down, leaving none selected.
    pub async fn shutdown(&mut self) {
        if let Some((kind, backend)) = self.active.take() {
            info!(target: LOG_TARGET, kind = %kind, "Shutting down active backend.");
            backend.shutdown().await;
        }
    }
}
