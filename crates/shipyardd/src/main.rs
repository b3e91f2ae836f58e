//! shipyardd — the Shipyard daemon.
//!
//! Single binary that assembles every Shipyard subsystem:
//! - Resource ledger (redb)
//! - Cluster gateway (HTTP API proxy or in-memory)
//! - Reconciliation loop
//! - Live command sessions + REST API
//! - Alert pipeline
//!
//! # Usage
//!
//! ```text
//! shipyardd serve --config /etc/shipyard/shipyard.toml
//! shipyardd check-config --config /etc/shipyard/shipyard.toml
//! ```

mod daemon;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use shipyard_core::ShipyardConfig;

#[derive(Parser)]
#[command(name = "shipyardd", about = "Shipyard daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Serve {
        /// TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `server.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Override `state.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Use the in-process cluster instead of the configured API server.
        #[arg(long)]
        in_memory_cluster: bool,
    },
    /// Validate a config file and print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,shipyardd=debug,shipyard=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            listen,
            data_dir,
            in_memory_cluster,
        } => {
            let mut config = match config {
                Some(path) => ShipyardConfig::from_file(&path)?,
                None => ShipyardConfig::default(),
            };
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.state.data_dir = data_dir;
            }
            config.validate()?;
            daemon::run(config, in_memory_cluster).await
        }
        Command::CheckConfig { config } => {
            let parsed = ShipyardConfig::from_file(&config)
                .with_context(|| format!("checking {}", config.display()))?;
            print!("{}", parsed.to_toml_string()?);
            Ok(())
        }
    }
}
