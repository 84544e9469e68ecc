use clap::Parser;
use log::{error, info};
use server::network::{Relay, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// JSON file with relay settings; command line flags are ignored when set
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Fixed terrain seed (random when omitted)
    #[arg(short, long)]
    seed: Option<u32>,

    /// Default round length in seconds
    #[arg(long, default_value = "180")]
    round_secs: u32,

    /// Key required on admin commands
    #[arg(long)]
    admin_key: Option<String>,
}

impl Args {
    fn relay_config(&self) -> Result<RelayConfig, Box<dyn std::error::Error>> {
        if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)?;
            return Ok(RelayConfig::from_json(&text)?);
        }

        let mut config = RelayConfig {
            max_clients: self.max_clients,
            seed: self.seed,
            ..RelayConfig::default()
        };
        config.flow.round_secs = self.round_secs;
        config.flow.admin_key = self.admin_key.clone();
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.relay_config()?;
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting relay on {}", address);
    let relay = Relay::bind(&address, config).await?;

    tokio::select! {
        result = relay.run() => {
            if let Err(e) = result {
                error!("Relay stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
