//!
//! src/main.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Command line driver over the rating engine, plus the live test
//! benches against the real providers
//!
//!

mod aggregate;
mod config;
mod disambiguate;
mod document;
mod engine;
mod fetch;
mod logging;
mod normalize;
mod persistent;
mod providers;
mod resolve;
mod search;
mod store;
mod types;

mod errors;
use crate::errors::RaterError;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::engine::Engine;
use crate::types::TrackKey;

#[derive(Parser, Debug)]
#[command(name = "track-rater", version, about = "Recommend songs and collect ratings for them")]
struct Cli {
    #[command(subcommand)]
    command: Command
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a song name or link to a tracked song
    Recommend {
        #[arg(required = true, num_args = 1..)]
        song: Vec<String>,
        /// Bind the posted message so it can be rated by message
        #[arg(long, requires = "message")]
        channel: Option<String>,
        #[arg(long, requires = "channel")]
        message: Option<String>
    },
    /// Rate a song by key or by the message it was posted in
    Rate {
        #[arg(long, conflicts_with = "channel", required_unless_present = "channel")]
        track: Option<String>,
        #[arg(long, requires = "message")]
        channel: Option<String>,
        #[arg(long, requires = "channel")]
        message: Option<String>,
        #[arg(long)]
        user: String,
        #[arg(long, allow_negative_numbers = true)]
        value: i64
    },
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: u32
    },
    MyRatings {
        #[arg(long)]
        user: String
    },
    /// Drop the binding of a deleted message
    Unbind {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        message: String
    },
    /// Recompute a song's statistics from its ratings
    Reconcile {
        #[arg(long)]
        track: String
    }
}

async fn run(engine: &Engine, command: Command, cancel: &CancellationToken) ->
    Result<serde_json::Value, RaterError> {
    let value = match command {
        Command::Recommend { song, channel, message } => {
            let raw = song.join(" ");
            let recommendation = match (channel, message) {
                (Some(channel), Some(message)) =>
                    engine.post(&raw, &channel, &message, cancel).await?,
                _ => engine.recommend(&raw, cancel).await?
            };
            serde_json::to_value(recommendation)?
        }
        Command::Rate { track, channel, message, user, value } => {
            let receipt = match (track, channel, message) {
                (Some(track), _, _) =>
                    engine.submit_rating(&TrackKey(track), &user, value).await?,
                (None, Some(channel), Some(message)) =>
                    engine.rate_message(&channel, &message, &user, value).await?,
                _ => return Err(RaterError::Config(
                    "rate needs --track or --channel with --message".into()
                ))
            };
            serde_json::to_value(receipt)?
        }
        Command::Leaderboard { limit } =>
            serde_json::to_value(engine.leaderboard(limit).await?)?,
        Command::MyRatings { user } =>
            serde_json::to_value(engine.user_history(&user).await?)?,
        Command::Unbind { channel, message } =>
            serde_json::json!({ "removed": engine.forget_message(&channel, &message).await? }),
        Command::Reconcile { track } =>
            serde_json::to_value(engine.reconcile(&TrackKey(track)).await?)?
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<(), RaterError> {
    let cli  = Cli::parse();
    let cfgs = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    let store  = store::open_store(&cfgs.store).await?;
    let engine = Engine::from_config(&cfgs, store)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown.interrupt");
            interrupt.cancel();
        }
    });

    match run(&engine, cli.command, &cancel).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "command.failed");
            eprintln!("{}", e.user_message());
            Err(e)
        }
    }
}
