//! Command-line interface.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::server;

#[derive(Parser)]
#[command(name = "voxserve", about = "Realtime AI voice conversation server", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the voice server (the default when no command is given).
    Serve {
        /// Address to bind.
        #[arg(long, env = "HOST")]
        host: Option<String>,
        /// Port to bind.
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();

    init_tracing(&config.log_level);

    if let Some(Command::Serve { host, port }) = cli.command {
        if let Some(host) = host {
            config.host = host;
        }
        if let Some(port) = port {
            config.port = port;
        }
    }

    server::start(config).await
}

/// Initialize logging; `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}
