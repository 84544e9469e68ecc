use clap::Parser;
use client::input::{IdleIntent, IntentSource, ScriptedIntent};
use client::scheduler::{run_session, SessionOutcome};
use log::{info, warn};
use serde::Deserialize;
use shared::SyncConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay websocket URL
    #[arg(short, long, default_value_t = format!("ws://127.0.0.1:{}", shared::DEFAULT_PORT))]
    url: String,

    /// Player name
    #[arg(short, long, default_value = "player")]
    name: String,

    /// Leave after this many seconds (runs until the session ends when omitted)
    #[arg(short, long)]
    duration: Option<f32>,

    /// Stand still instead of running the patrol script
    #[arg(long)]
    idle: bool,

    /// JSON file with sync settings
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientSettings {
    sync: SyncConfig,
    name: Option<String>,
}

impl Args {
    fn settings(&self) -> Result<ClientSettings, Box<dyn std::error::Error>> {
        match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&text)?)
            }
            None => Ok(ClientSettings::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let settings = args.settings()?;
    let name = settings.name.clone().unwrap_or_else(|| args.name.clone());
    let limit = args.duration.map(Duration::from_secs_f32);

    info!("Starting client {} against {}", name, args.url);
    info!(
        "Ticking at {} Hz, sending at {} Hz",
        settings.sync.tick_rate, settings.sync.send_rate
    );

    let mut intents: Box<dyn IntentSource> = if args.idle {
        Box::new(IdleIntent)
    } else {
        Box::new(ScriptedIntent::patrol())
    };

    match run_session(&args.url, &settings.sync, &name, intents.as_mut(), limit).await? {
        SessionOutcome::Closed => info!("Session closed"),
        SessionOutcome::ReturnToLobby(reason) => warn!("Returned to lobby: {}", reason),
        SessionOutcome::GameOver(leaderboard) => {
            info!("Game over");
            for (rank, entry) in leaderboard.iter().enumerate() {
                info!("{:>2}. {} ({}) - {}", rank + 1, entry.name, entry.id, entry.score);
            }
        }
    }

    Ok(())
}
