use std::process;

use clap::{Parser, Subcommand};

mod commands;

/// formsync: real-time form replication node.
///
/// Serves browser clients over WebSocket and replicates every form to a
/// static set of peer nodes.
#[derive(Parser)]
#[command(name = "formsync", version, about, long_about = None)]
struct Cli {
    /// Verbose logging (-v for debug, -vv for trace). Ignored when RUST_LOG is set.
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node until Ctrl-C.
    Serve {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<String>,

        /// Override `server.host`.
        #[arg(long)]
        host: Option<String>,

        /// Override `server.port`.
        #[arg(short, long)]
        port: Option<u16>,

        /// Replica peer as host:port. Repeatable; replaces the configured peers.
        #[arg(long = "peer", value_name = "HOST:PORT")]
        peers: Vec<String>,
    },

    /// Parse and validate a config file, then print what it resolves to.
    CheckConfig {
        /// Path to the TOML config file.
        path: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            peers,
        } => commands::serve(config.as_deref(), host, port, &peers, cli.verbose).await,
        Commands::CheckConfig { path } => commands::check_config(&path),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
