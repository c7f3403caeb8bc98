//! Command-line interface implementation

use clap::Parser;
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::backend::BackendKind;
use crate::player::{CommandReply, PlaybackSnapshot, PlayerError, PlayerHandle};

const LOG_TARGET: &str = "jukeboxd::ui";

/// Command-line arguments for jukeboxd
#[derive(Parser, Debug)]
#[command(author, version, about = "Headless jukebox with a durable play queue", long_about = None)]
pub struct Args {
    /// Config file path
    #[arg(short, long, env = "JUKEBOXD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend to start with (process, http_daemon, socket_daemon)
    #[arg(short, long, env = "JUKEBOXD_BACKEND")]
    pub backend: Option<BackendKind>,

    /// Directory for playback state and play counts
    #[arg(short, long, env = "JUKEBOXD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "JUKEBOXD_JSON_LOGS")]
    pub json_logs: bool,
}

/// One line typed at the console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Add(String),
    Remove(usize),
    Move { from: usize, to: usize },
    Clear,
    Play,
    Pause,
    Resume,
    Stop,
    Skip,
    Seek(f64),
    Volume(f64),
    Mute,
    Status,
    Backend(BackendKind),
    Help,
    Quit,
}

fn parse_number<T: std::str::FromStr>(arg: Option<&str>, what: &str) -> Result<T, String> {
    let raw = arg.ok_or_else(|| format!("missing {}", what))?;
    raw.parse::<T>()
        .map_err(|_| format!("invalid {} '{}'", what, raw))
}

impl ConsoleCommand {
    /// Parses a console line. Queue positions are 1-based at the prompt.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();

        let position = |value: usize| -> Result<usize, String> {
            value
                .checked_sub(1)
                .ok_or_else(|| "queue positions start at 1".to_string())
        };

        match word.to_ascii_lowercase().as_str() {
            "add" | "a" => {
                if rest.is_empty() {
                    Err("usage: add <path>".to_string())
                } else {
                    Ok(ConsoleCommand::Add(rest.to_string()))
                }
            }
            "rm" | "remove" => Ok(ConsoleCommand::Remove(position(parse_number(args.next(), "position")?)?)),
            "mv" | "move" => {
                let from = position(parse_number(args.next(), "source position")?)?;
                let to = position(parse_number(args.next(), "target position")?)?;
                Ok(ConsoleCommand::Move { from, to })
            }
            "clear" => Ok(ConsoleCommand::Clear),
            "play" | "p" => Ok(ConsoleCommand::Play),
            "pause" => Ok(ConsoleCommand::Pause),
            "resume" => Ok(ConsoleCommand::Resume),
            "stop" => Ok(ConsoleCommand::Stop),
            "skip" | "next" | "n" => Ok(ConsoleCommand::Skip),
            "seek" => Ok(ConsoleCommand::Seek(parse_number(args.next(), "position")?)),
            "vol" | "volume" => Ok(ConsoleCommand::Volume(parse_number(args.next(), "volume")?)),
            "mute" => Ok(ConsoleCommand::Mute),
            "status" | "s" | "" => Ok(ConsoleCommand::Status),
            "backend" => {
                let kind = args.next().ok_or_else(|| "usage: backend <kind>".to_string())?;
                Ok(ConsoleCommand::Backend(kind.parse()?))
            }
            "help" | "?" => Ok(ConsoleCommand::Help),
            "quit" | "exit" | "q" => Ok(ConsoleCommand::Quit),
            other => Err(format!("unknown command '{}' (try 'help')", other)),
        }
    }
}

/// Sends a parsed command to the player. `Help` and `Quit` are handled by the
/// caller and fall back to a status query here.
pub async fn dispatch(handle: &PlayerHandle, command: &ConsoleCommand) -> Result<CommandReply, PlayerError> {
    match command {
        ConsoleCommand::Add(path) => handle.enqueue_path(path).await,
        ConsoleCommand::Remove(index) => handle.remove_at(*index).await,
        ConsoleCommand::Move { from, to } => handle.reorder(*from, *to).await,
        ConsoleCommand::Clear => handle.clear_queue().await,
        ConsoleCommand::Play => handle.play().await,
        ConsoleCommand::Pause => handle.pause().await,
        ConsoleCommand::Resume => handle.resume().await,
        ConsoleCommand::Stop => handle.stop().await,
        ConsoleCommand::Skip => handle.skip().await,
        ConsoleCommand::Seek(position) => handle.seek_to(*position).await,
        ConsoleCommand::Volume(volume) => handle.set_volume(*volume).await,
        ConsoleCommand::Mute => handle.toggle_mute().await,
        ConsoleCommand::Backend(kind) => handle.select_backend(*kind).await,
        ConsoleCommand::Status | ConsoleCommand::Help | ConsoleCommand::Quit => {
            let snapshot = handle.snapshot().await?;
            Ok(CommandReply { ok: true, snapshot })
        }
    }
}

fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Renders a snapshot for the console.
pub fn format_snapshot(snapshot: &PlaybackSnapshot) -> String {
    let mut out = String::new();
    let state = match snapshot.state {
        crate::player::PlaybackState::Idle => "idle",
        crate::player::PlaybackState::Playing => "playing",
        crate::player::PlaybackState::Paused => "paused",
        crate::player::PlaybackState::Stopping => "stopping",
        crate::player::PlaybackState::Stalled => "stalled",
    };
    let volume = if snapshot.is_muted {
        "muted".to_string()
    } else {
        format!("{:.0}%", snapshot.volume * 100.0)
    };
    out.push_str(&format!("[{}] backend: {}  volume: {}\n", state, snapshot.backend, volume));

    match &snapshot.current_track {
        Some(track) => {
            let total = snapshot
                .duration_secs
                .map(format_clock)
                .unwrap_or_else(|| "?".to_string());
            out.push_str(&format!(
                "Now: {}{}  {} / {}\n",
                track.title,
                if track.artist.is_empty() {
                    String::new()
                } else {
                    format!(" - {}", track.artist)
                },
                format_clock(snapshot.position_secs),
                total
            ));
        }
        None => out.push_str("Now: -\n"),
    }

    if snapshot.queue.is_empty() {
        out.push_str("Queue is empty.\n");
    } else {
        out.push_str(&format!("{:<5} {:<40} {}\n", "#", "Title", "Artist"));
        for (index, track) in snapshot.queue.iter().enumerate() {
            let title = if track.title.len() > 38 {
                format!("{:.35}...", track.title)
            } else {
                track.title.clone()
            };
            out.push_str(&format!("{:<5} {:<40} {}\n", index + 1, title, track.artist));
        }
    }
    out
}

pub const HELP_TEXT: &str = "\
Commands:
  add <path>        append a track to the queue
  rm <n>            remove queue entry n
  mv <from> <to>    move a queue entry
  clear             empty the queue
  play | pause | resume | stop | skip
  seek <0..1>       jump to a fraction of the track
  vol <0..1>        set the volume
  mute              toggle mute
  status            show the player
  backend <kind>    switch to process, http_daemon or socket_daemon
  quit";

/// CLI user interface for interacting with the application
pub struct Cli {
    pub args: Args,
}

impl Cli {
    /// Create a new CLI instance
    pub fn new() -> Self {
        Cli {
            args: Args::parse(),
        }
    }

    /// Display a playback snapshot
    pub fn display_snapshot(&self, snapshot: &PlaybackSnapshot) {
        println!("{}", format_snapshot(snapshot));
    }

    fn prompt(&self) -> Result<(), Box<dyn Error>> {
        print!("jukebox> ");
        io::stdout().flush()?;
        Ok(())
    }

    /// Reads commands from stdin until `quit` or end of input.
    pub async fn run_console(&self, handle: &PlayerHandle) -> Result<(), Box<dyn Error>> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{}", HELP_TEXT);
        self.prompt()?;

        while let Some(line) = lines.next_line().await? {
            let command = match ConsoleCommand::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    println!("{}", e);
                    self.prompt()?;
                    continue;
                }
            };
            debug!(target: LOG_TARGET, ?command, "Console command.");

            match command {
                ConsoleCommand::Quit => break,
                ConsoleCommand::Help => println!("{}", HELP_TEXT),
                _ => match dispatch(handle, &command).await {
                    Ok(reply) => {
                        if !reply.ok {
                            println!("(command had no effect)");
                        }
                        self.display_snapshot(&reply.snapshot);
                    }
                    Err(e) => {
                        warn!(target: LOG_TARGET, "Player unavailable: {}", e);
                        return Err(Box::new(e));
                    }
                },
            }
            self.prompt()?;
        }
        Ok(())
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}
