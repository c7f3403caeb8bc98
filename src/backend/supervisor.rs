// src/backend/supervisor.rs

use super::error::BackendError;
use super::{CompletionSlot, CompletionSource, DaemonState};
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

const LOG_TARGET: &str = "jukeboxd::backend::supervisor";

/// How long `terminate` waits for the watcher before aborting it.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type ExitHook = Box<dyn FnOnce() + Send + 'static>;

/// Sends `signal` to `pid`.
pub fn signal_pid(pid: u32, signal: libc::c_int) -> Result<(), BackendError> {
    // SAFETY: kill(2) takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(BackendError::IoError(io::Error::last_os_error()))
    }
}

/// A child process owned by a watcher task.
///
/// The watcher waits for either a natural exit or a kill request. The exit
/// hook runs only for a natural exit that happens while the child is armed;
/// disarming (or killing) guarantees the hook never runs.
#[derive(Debug)]
pub struct SupervisedChild {
    label: String,
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    task_handle: JoinHandle<()>,
}

impl SupervisedChild {
    /// Spawns `program args…` with null stdio and starts the watcher task.
    #[instrument(skip(args, on_exit))]
    pub fn spawn(
        label: &str,
        program: &str,
        args: &[String],
        on_exit: ExitHook,
    ) -> Result<Self, BackendError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();
        info!(target: LOG_TARGET, label, program, ?pid, "Spawned backend process.");

        let exited = Arc::new(AtomicBool::new(false));
        let armed = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let task_label = label.to_string();
        let task_exited = exited.clone();
        let task_armed = armed.clone();
        let task_handle = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    task_exited.store(true, Ordering::SeqCst);
                    match status {
                        Ok(status) => info!(target: LOG_TARGET, label = %task_label, %status, "Backend process exited."),
                        Err(e) => warn!(target: LOG_TARGET, label = %task_label, "Failed waiting on backend process: {}", e),
                    }
                    if task_armed.swap(false, Ordering::SeqCst) {
                        on_exit();
                    } else {
                        trace!(target: LOG_TARGET, label = %task_label, "Exit hook not armed, ignoring exit.");
                    }
                }
                _ = kill_rx => {
                    task_armed.store(false, Ordering::SeqCst);
                    if let Err(e) = child.kill().await {
                        // Already gone is the common case here.
                        debug!(target: LOG_TARGET, label = %task_label, "Kill request failed: {}", e);
                    }
                    task_exited.store(true, Ordering::SeqCst);
                    debug!(target: LOG_TARGET, label = %task_label, "Backend process killed on request.");
                }
            }
        });

        Ok(SupervisedChild {
            label: label.to_string(),
            pid,
            exited,
            armed,
            kill_tx: Some(kill_tx),
            task_handle,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        !self.has_exited()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Disarms the exit hook. Returns `true` if it was still armed, meaning the
    /// hook has not run and now never will.
    pub fn disarm(&self) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }

    pub fn signal(&self, signal: libc::c_int) -> Result<(), BackendError> {
        if self.has_exited() {
            return Err(BackendError::NotRunning(self.label.clone()));
        }
        let pid = self
            .pid
            .ok_or_else(|| BackendError::NotRunning(self.label.clone()))?;
        signal_pid(pid, signal)
    }

    /// Kills the process and waits for the watcher, aborting it after `wait`.
    #[instrument(skip(self), fields(label = %self.label))]
    pub async fn terminate(mut self, wait: Duration) {
        self.disarm();
        if let Some(tx) = self.kill_tx.take() {
            if tx.send(()).is_err() {
                trace!(target: LOG_TARGET, label = %self.label, "Watcher already finished before kill request.");
            }
        }
        tokio::select! {
            biased;
            result = &mut self.task_handle => {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(target: LOG_TARGET, label = %self.label, "Process watcher panicked: {:?}", e);
                    }
                }
            }
            _ = tokio::time::sleep(wait) => {
                error!(target: LOG_TARGET, label = %self.label, "Timeout waiting for process watcher after {:?}. Aborting.", wait);
                self.task_handle.abort();
                if let Some(pid) = self.pid {
                    let _ = signal_pid(pid, libc::SIGKILL);
                }
            }
        }
    }
}

/// How a daemon is launched when it is not already reachable.
#[derive(Debug, Clone)]
pub struct DaemonLaunch {
    pub spawn: bool,
    pub program: String,
    pub args: Vec<String>,
    pub startup_retries: u32,
    pub retry_delay: Duration,
}

/// Keeps a long-lived daemon reachable: check it, then restart and retry.
pub struct DaemonSupervisor {
    label: &'static str,
    launch: DaemonLaunch,
    child: TokioMutex<Option<SupervisedChild>>,
    on_exit: Arc<dyn Fn() + Send + Sync>,
}

impl DaemonSupervisor {
    pub fn new(label: &'static str, launch: DaemonLaunch, on_exit: Arc<dyn Fn() + Send + Sync>) -> Self {
        DaemonSupervisor {
            label,
            launch,
            child: TokioMutex::new(None),
            on_exit,
        }
    }

    /// Returns `true` when `reachable` succeeds, (re)starting the daemon process if
    /// it does not and launching is enabled.
    pub async fn ensure_running<F, Fut>(&self, reachable: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        if reachable().await {
            return true;
        }
        if !self.launch.spawn {
            warn!(target: LOG_TARGET, label = self.label, "Daemon not reachable and launching is disabled.");
            return false;
        }

        {
            let mut guard = self.child.lock().await;
            if let Some(old) = guard.take() {
                warn!(target: LOG_TARGET, label = self.label, alive = old.is_alive(), "Daemon unresponsive, restarting it.");
                old.terminate(TERMINATE_TIMEOUT).await;
            }
            let hook = self.on_exit.clone();
            match SupervisedChild::spawn(self.label, &self.launch.program, &self.launch.args, Box::new(move || hook())) {
                Ok(child) => {
                    child.arm();
                    *guard = Some(child);
                }
                Err(e) => {
                    error!(target: LOG_TARGET, label = self.label, "Failed to launch daemon: {}", e);
                    return false;
                }
            }
        }

        for attempt in 1..=self.launch.startup_retries.max(1) {
            tokio::time::sleep(self.launch.retry_delay).await;
            if reachable().await {
                info!(target: LOG_TARGET, label = self.label, attempt, "Daemon reachable.");
                return true;
            }
            debug!(target: LOG_TARGET, label = self.label, attempt, "Daemon not reachable yet.");
        }
        error!(target: LOG_TARGET, label = self.label, retries = self.launch.startup_retries, "Daemon did not become reachable.");
        false
    }

    /// Pid of the owned daemon process, if it is alive.
    pub async fn owned_pid(&self) -> Option<u32> {
        let guard = self.child.lock().await;
        guard.as_ref().filter(|c| c.is_alive()).and_then(|c| c.pid())
    }

    pub async fn owns_live_process(&self) -> bool {
        let guard = self.child.lock().await;
        guard.as_ref().map(|c| c.is_alive()).unwrap_or(false)
    }

    pub fn launches(&self) -> bool {
        self.launch.spawn
    }

    /// Kills the owned daemon process, if any. Its exit hook does not run.
    pub async fn terminate(&self) {
        let child = self.child.lock().await.take();
        if let Some(child) = child {
            info!(target: LOG_TARGET, label = self.label, "Terminating owned daemon process.");
            child.terminate(TERMINATE_TIMEOUT).await;
        }
    }
}

/// What a daemon adapter believes it has loaded.
#[derive(Debug, Default, Clone)]
pub struct LoadedTrack {
    pub path: Option<String>,
    pub duration_secs: Option<f64>,
    pub playing: bool,
}

pub type SharedTrack = Arc<std::sync::Mutex<LoadedTrack>>;

pub fn lock_track(track: &SharedTrack) -> std::sync::MutexGuard<'_, LoadedTrack> {
    track.lock().unwrap_or_else(|p| p.into_inner())
}

/// Exit hook for a supervised daemon: a daemon dying mid-track ends that track.
pub fn daemon_exit_hook(track: SharedTrack, completion: CompletionSlot) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || {
        let was_playing = {
            let mut guard = lock_track(&track);
            std::mem::replace(&mut guard.playing, false)
        };
        if was_playing {
            warn!(target: LOG_TARGET, "Daemon exited while a track was playing.");
            completion.fire(CompletionSource::DaemonExit);
        }
    })
}

/// Polls `sample` until it reports `Playing` or `within` elapses.
pub async fn confirm_playing<F, Fut>(within: Duration, sample: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<DaemonState>>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match sample().await {
            Some(DaemonState::Playing) => return true,
            other => trace!(target: LOG_TARGET, state = ?other, "Waiting for daemon to report playing."),
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
    }
}
