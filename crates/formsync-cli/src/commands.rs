use formsync::config::PeerConfig;
use formsync::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// `formsync serve`: run a node.
pub async fn serve(
    config_path: Option<&str>,
    host: Option<String>,
    port: Option<u16>,
    peers: &[String],
    verbose: u8,
) -> Result {
    let mut config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if !peers.is_empty() {
        config.replication.peers = peers
            .iter()
            .map(|peer| peer.parse::<PeerConfig>())
            .collect::<std::result::Result<_, _>>()?;
    }
    config.validate()?;

    init_tracing(&config.log.level, verbose)?;
    info!(
        config = config_path.unwrap_or("(defaults)"),
        listen = %config.server.bind_addr(),
        peers = config.replication.peers.len(),
        queue_order = ?config.replication.queue_order,
        reconnect_ms = config.replication.reconnect_timeout_ms,
        "starting node"
    );

    formsync_server::start(&config).await.map_err(|e| {
        error!(error = %e, "node stopped");
        e
    })
}

/// `formsync check-config <path>`: validate a config file.
pub fn check_config(path: &str) -> Result {
    let config = Config::load(path)?;
    let replication = &config.replication;

    println!("Config: {path}");
    println!();
    println!("  {:<22} {}", "listen", config.server.bind_addr());
    println!("  {:<22} {} ms", "reconnect interval", replication.reconnect_timeout_ms);
    println!("  {:<22} {:?}", "queue order", replication.queue_order);
    println!("  {:<22} {}", "log level", config.log.level);
    println!();

    if replication.peers.is_empty() {
        println!("  (no replica peers)");
        return Ok(());
    }

    println!("  {:<4} {:<30} {:>6}", "#", "Peer", "Port");
    println!("  {}", "-".repeat(42));
    for (i, peer) in replication.peers.iter().enumerate() {
        println!("  {:<4} {:<30} {:>6}", i + 1, peer.host, peer.port);
    }
    println!();

    Ok(())
}

fn init_tracing(level: &str, verbose: u8) -> Result {
    // RUST_LOG wins over the config file and -v.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match verbose {
            0 => EnvFilter::try_new(level)?,
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;
    Ok(())
}
