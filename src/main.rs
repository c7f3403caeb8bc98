use jukeboxd::backend::{BackendSelector, DefaultBackendFactory};
use jukeboxd::config::Settings;
use jukeboxd::init_app_dirs;
use jukeboxd::player::{Player, PlayerTimings};
use jukeboxd::queue::StateStore;
use jukeboxd::stats::PlayCountFile;
use jukeboxd::ui::Cli;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_TARGET: &str = "jukeboxd::main";

/// Logs go to stderr so the console on stdout stays readable.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse command-line arguments and initialize CLI
    let cli = Cli::new();
    let args = &cli.args;
    init_logging(args.json_logs);

    // Load configuration from file or create default
    let config_path = args.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&config_path)?;

    // Command-line arguments override the file
    if let Some(kind) = args.backend {
        settings.backend = kind;
    }
    if let Some(dir) = &args.data_dir {
        settings.data_dir = Some(dir.clone());
    }
    settings.validate()?;

    init_app_dirs(&settings)?;
    info!(
        target: LOG_TARGET,
        config = %config_path.display(),
        backend = %settings.backend,
        data_dir = %settings.data_dir().display(),
        "Starting jukeboxd."
    );

    let selector = BackendSelector::new(Box::new(DefaultBackendFactory::new(settings.clone())));
    let store = StateStore::new(settings.state_file_path(), settings.state_freshness());
    let recorder = Arc::new(PlayCountFile::new(settings.play_counts_path()));
    let (handle, player_task) = Player::spawn(
        selector,
        settings.backend,
        store,
        recorder,
        PlayerTimings::from_settings(&settings),
    )
    .await;

    let console_result = tokio::select! {
        result = cli.run_console(&handle) => result,
        _ = tokio::signal::ctrl_c() => {
            info!(target: LOG_TARGET, "Interrupted.");
            Ok(())
        }
    };

    if let Err(e) = handle.shutdown().await {
        error!(target: LOG_TARGET, "Player did not shut down cleanly: {}", e);
    }
    if let Err(e) = player_task.await {
        error!(target: LOG_TARGET, "Player task failed: {:?}", e);
    }
    info!(target: LOG_TARGET, "Goodbye.");
    console_result
}
