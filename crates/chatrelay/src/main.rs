//! Chatrelay daemon - SSE relay for streamed LLM completions

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::RelayError;
use chatrelay::config::{Config, LogConfig};
use chatrelay::error::Result;
use chatrelay::ledger::MockLedger;
use chatrelay::relay::OpenAiUpstream;
use chatrelay::server::RelayServer;

/// Chatrelay - stream LLM completions to clients over server-sent events
#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Relay streamed LLM completions to clients over server-sent events")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the relay server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = load_config(cli.config)?;
    let _guard = init_logging(&config.log)?;

    match source {
        Some(path) => tracing::info!("Loaded config from: {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    match cli.command {
        None | Some(Command::Serve) => serve(config).await,
    }
}

/// Install the global subscriber; keep the returned guard alive to flush file logs
fn init_logging(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},chatrelay=debug", log.level)));

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                RelayError::Config(format!(
                    "Failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(dir, "chatrelay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Load config from `config_path`, else the first default location that exists
fn load_config(config_path: Option<PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    let (config, source) = if let Some(path) = config_path {
        (Config::from_file(&path)?, Some(path))
    } else {
        let default_paths = [
            dirs::home_dir().map(|h| h.join(".chatrelay").join("config.toml")),
            dirs::config_dir().map(|c| c.join("chatrelay").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        match default_paths.into_iter().flatten().find(|p| p.exists()) {
            Some(path) => (Config::from_file(&path)?, Some(path)),
            None => (Config::default(), None),
        }
    };

    config.validate()?;
    Ok((config, source))
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting chatrelay daemon");
    tracing::debug!("Config loaded: {:?}", config);

    let upstream = Arc::new(OpenAiUpstream::new(&config.chat)?);
    let ledger = Arc::new(MockLedger::new(config.ledger.chain_id));
    if let Some(rpc_url) = &config.ledger.rpc_url {
        tracing::info!("Ledger RPC URL configured ({rpc_url}); using in-process ledger");
    }

    let server = RelayServer::new(config, upstream, ledger);
    server.serve().await
}
