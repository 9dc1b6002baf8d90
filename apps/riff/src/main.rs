//! Riff - one command line for Spotify and Sonos playback.
//!
//! This binary wires riff-core to a YAML config file, environment overrides,
//! logging and a small set of subcommands. Playback commands recover from
//! "no active device" by moving playback to `--device`, the configured default,
//! or a device picked interactively.

mod app;
mod config;
mod picker;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use riff_core::spotify::SearchKind;
use riff_core::{ErrorKind, PlayerError};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::app::{App, PlayRequest};
use crate::config::RiffConfig;

/// Riff - control Spotify and Sonos playback from one place.
#[derive(Parser, Debug)]
#[command(name = "riff")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "RIFF_LOG_LEVEL", global = true)]
    log_level: log::LevelFilter,

    /// Target device by name or id (Spotify device or Sonos room).
    #[arg(short, long, value_name = "NAME|ID", global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the Spotify login.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// List Spotify devices and Sonos speakers.
    Devices {
        /// Rediscover Sonos speakers instead of using the cache.
        #[arg(short, long)]
        refresh: bool,
    },
    /// Show what is playing.
    Status,
    /// Resume playback, or search and play.
    Play(PlayArgs),
    /// Pause playback.
    Pause,
    /// Skip to the next track.
    Next,
    /// Go back to the previous track.
    Prev,
    /// Seek within the current track.
    Seek {
        /// Position from the start of the track.
        seconds: u64,
    },
    /// Set the volume (defaults.volume when omitted).
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        level: Option<u8>,
    },
    /// Show or extend the play queue.
    Queue {
        #[command(subcommand)]
        action: Option<QueueAction>,
    },
    /// Show recently played tracks.
    History {
        /// Number of entries (1-50).
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
    /// Group or ungroup Sonos speakers.
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Print playback events as they happen.
    Tail {
        /// One JSON object per line.
        #[arg(long)]
        json: bool,
        /// Prefix each line with the local time.
        #[arg(long)]
        timestamps: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct PlayArgs {
    /// Search terms, or a Spotify URI.
    query: Vec<String>,

    /// Play this Spotify URI (track, album, playlist, artist, episode, show).
    #[arg(long, conflicts_with = "query")]
    uri: Option<String>,

    /// Search for an album.
    #[arg(long, conflicts_with_all = ["playlist", "artist"])]
    album: bool,

    /// Search for a playlist.
    #[arg(long, conflicts_with = "artist")]
    playlist: bool,

    /// Search for an artist.
    #[arg(long)]
    artist: bool,

    /// Turn shuffle on after starting playback.
    #[arg(long)]
    shuffle: bool,
}

impl PlayArgs {
    fn into_request(self) -> PlayRequest {
        let kind = if self.album {
            Some(SearchKind::Album)
        } else if self.playlist {
            Some(SearchKind::Playlist)
        } else if self.artist {
            Some(SearchKind::Artist)
        } else {
            None
        };
        PlayRequest {
            query: (!self.query.is_empty()).then(|| self.query.join(" ")),
            uri: self.uri,
            kind,
            shuffle: self.shuffle,
        }
    }
}

#[derive(Subcommand, Debug)]
enum AuthAction {
    /// Log in through the browser.
    Login,
    /// Forget the stored token.
    Logout,
    /// Show whether a token is stored and when it expires.
    Status,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// List the queue.
    Show,
    /// Append a URI to the queue.
    Add { uri: String },
}

#[derive(Subcommand, Debug)]
enum GroupAction {
    /// List zone groups and their members.
    List,
    /// Add ROOM to the group led by COORDINATOR.
    Join { room: String, coordinator: String },
    /// Make ROOM a standalone speaker.
    Leave { room: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::debug!("Riff v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        log::debug!("Shutdown signal received");
        on_signal.cancel();
    });

    match run(args, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    let config =
        RiffConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let app = App::new(config, args.device, cancel)?;

    match args.command {
        Command::Auth { action } => match action {
            AuthAction::Login => app.auth_login().await,
            AuthAction::Logout => app.auth_logout().await,
            AuthAction::Status => app.auth_status().await,
        },
        Command::Devices { refresh } => app.devices(refresh).await,
        Command::Status => app.status().await,
        Command::Play(play) => app.play(play.into_request()).await,
        Command::Pause => app.pause().await,
        Command::Next => app.next().await,
        Command::Prev => app.prev().await,
        Command::Seek { seconds } => app.seek(seconds).await,
        Command::Volume { level } => app.volume(level).await,
        Command::Queue { action } => match action.unwrap_or(QueueAction::Show) {
            QueueAction::Show => app.queue_show().await,
            QueueAction::Add { uri } => app.queue_add(uri).await,
        },
        Command::History { limit } => app.history(limit).await,
        Command::Group { action } => match action {
            GroupAction::List => app.group_list().await,
            GroupAction::Join { room, coordinator } => app.group_join(&room, &coordinator).await,
            GroupAction::Leave { room } => app.group_leave(&room).await,
        },
        Command::Tail { json, timestamps } => app.tail(json, timestamps).await,
    }
}

/// Prints the error chain and a recovery hint, and picks the exit code.
fn report(err: &anyhow::Error) -> ExitCode {
    let player_err = err.downcast_ref::<PlayerError>();
    if player_err.is_some_and(|e| e.kind() == ErrorKind::Cancelled) {
        eprintln!("Cancelled");
        return ExitCode::from(130);
    }

    eprintln!("Error: {err:#}");
    if let Some(hint) = player_err.and_then(PlayerError::suggestion) {
        eprintln!("Hint: {hint}");
    }
    ExitCode::FAILURE
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
