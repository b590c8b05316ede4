//! portmap CLI - connect this machine to portmap.io
//!
//! `portmap connect <CONFIG>` brings the tunnel up, prints the forwarding
//! rules served through it and stays in the foreground until Ctrl+C or
//! SIGTERM, then tears everything down.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use portmap::api::HttpResourceApi;
use portmap::net::{self, SystemCommandRunner};
use portmap::tunnel::UserspaceDeviceFactory;
use portmap::{Connector, PortmapError, Settings};

/// portmap.io connect client
#[derive(Parser, Debug)]
#[command(name = "portmap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// API token (defaults to $PORTMAP_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// API base URL (defaults to $PORTMAP_API_URL, then https://portmap.io/api)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring up the tunnel described by a config file
    Connect {
        /// Path to the WireGuard configuration downloaded from portmap.io
        config: PathBuf,

        /// Running under a service manager: no banner or traffic display
        #[arg(long)]
        service: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(args: Args) -> Result<(), PortmapError> {
    let settings = Settings::resolve(args.token, args.api_url, args.env_file.as_deref())?;

    match args.command {
        Command::Connect { config, service } => {
            tracing::info!("Loading configuration from: {}", config.display());

            let api = HttpResourceApi::new(settings.api_url, settings.token)?;
            let connector = Connector::new(
                Arc::new(api),
                Box::new(UserspaceDeviceFactory),
                net::for_current_platform(Arc::new(SystemCommandRunner)),
            );
            connector.run(&config, service).await
        }
    }
}
