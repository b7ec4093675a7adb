//! Pipboy - companion-device protocol
//!
//! Serve a model to companion apps, mirror a running game, relay between the
//! two, discover games on the network and convert snapshot files. While a
//! model is live, console commands are read from stdin.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pipboy::config::{self, Config};
use pipboy::console;
use pipboy::discovery::{self, DiscoverOptions, DiscoveryConfig, Responder};
use pipboy::format::literal;
use pipboy::model::{Model, ROOT};
use pipboy::network::{Client, ClientEvent, NetworkConfig, Server, ServerEvent};
use pipboy::protocol::ServerInfo;
use pipboy::snapshot;

/// Pipboy - companion-device protocol tools
#[derive(Parser)]
#[command(name = "pipboy")]
#[command(version = "0.1.0")]
#[command(about = "Mirror game state to companion apps over the Pipboy protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a model to companion apps
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Preload a channel dump
        #[arg(long, conflicts_with = "asset")]
        load: Option<PathBuf>,

        /// Preload an asset-tree file
        #[arg(long)]
        asset: Option<PathBuf>,

        /// Do not answer discovery broadcasts
        #[arg(long)]
        no_discovery: bool,
    },

    /// Connect to a game and mirror its model
    Connect {
        /// Game address, as host or host:port
        address: Option<String>,

        /// Game port
        #[arg(short, long)]
        port: Option<u16>,

        /// Use discovery to find a free game
        #[arg(short, long, conflicts_with = "address")]
        discover: bool,

        /// Export the mirrored model as JSON on exit
        #[arg(long)]
        json: Option<PathBuf>,

        /// Save the mirrored model as a channel dump on exit
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Mirror a game and serve the mirror to companion apps
    Relay {
        /// Game address, as host or host:port
        address: Option<String>,

        /// Game port
        #[arg(short, long)]
        port: Option<u16>,

        /// Use discovery to find a free game
        #[arg(short, long, conflicts_with = "address")]
        discover: bool,

        /// Port companions connect to
        #[arg(short, long)]
        listen: Option<u16>,
    },

    /// Discover games on the network
    Discover {
        /// How long to scan (seconds)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Stop after this many answers
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Only list games that are not busy
        #[arg(long)]
        free_only: bool,
    },

    /// Convert a snapshot file to a JSON document
    Export {
        /// Channel dump (or asset tree with --asset)
        input: PathBuf,

        /// Read the input as an asset tree
        #[arg(long)]
        asset: bool,

        /// Output path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if let Some(level) = &config.general.log_level {
        EnvFilter::new(level)
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            load,
            asset,
            no_discovery,
        } => {
            run_server(config, port, load, asset, !no_discovery).await?;
        }
        Commands::Connect {
            address,
            port,
            discover,
            json,
            save,
        } => {
            run_client(config, address, port, discover, json, save).await?;
        }
        Commands::Relay {
            address,
            port,
            discover,
            listen,
        } => {
            run_relay(config, address, port, discover, listen).await?;
        }
        Commands::Discover {
            timeout,
            count,
            free_only,
        } => {
            run_discovery(&config, timeout, count, free_only).await?;
        }
        Commands::Export {
            input,
            asset,
            output,
        } => {
            export(&input, asset, output.as_deref())?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Serve a model to companion apps
async fn run_server(
    config: Config,
    port: Option<u16>,
    load: Option<PathBuf>,
    asset: Option<PathBuf>,
    discoverable: bool,
) -> anyhow::Result<()> {
    let model = Arc::new(Model::new());
    if let Some(path) = &load {
        model.load(snapshot::load_channel(path)?);
    } else if let Some(path) = &asset {
        model.load(snapshot::load_asset(path)?);
    }
    tracing::info!("Serving {} items", model.len());

    let mut net_config = NetworkConfig::from(&config.network);
    if let Some(port) = port {
        net_config.port = port;
    }

    let info = ServerInfo::from(&config.server);
    let mut server = Server::new(net_config, model.clone(), info.clone());
    let mut event_rx = server
        .take_event_receiver()
        .context("server event receiver already taken")?;

    let bind_addr = server.start().await?;

    let mut responder = if discoverable {
        let mut responder = Responder::new(DiscoveryConfig::from(&config.discovery));
        responder.start().await?;
        Some(responder)
    } else {
        None
    };

    println!("\n========================================");
    println!("  Pipboy Server Running");
    println!("========================================");
    println!("  Address: {}", bind_addr);
    println!("  Version: {} ({})", info.version, info.lang);
    println!("  Discovery: {}", if discoverable { "on" } else { "off" });
    println!("========================================");
    println!("\nWaiting for companions to connect...");
    println!("Type help for console commands. Press Ctrl+C to stop.\n");

    let mut console_input = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::ClientConnected { addr } => {
                        println!("+ Companion connected: {}", addr);
                    }
                    ServerEvent::ClientDisconnected { addr, reason } => {
                        println!("- Companion disconnected: {} ({})", addr, reason);
                    }
                    ServerEvent::Started { bind_addr } => {
                        tracing::debug!("Server started on {}", bind_addr);
                    }
                    ServerEvent::Stopped => break,
                }
            }
            line = console_input.next_line(), if console_open => {
                console_open = console_line(&model, line);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if let Some(responder) = responder.as_mut() {
        responder.stop().await?;
    }
    if server.is_running() {
        server.stop().await?;
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// Resolve the game to connect to
async fn resolve_target(
    config: &Config,
    address: Option<String>,
    port: u16,
    discover: bool,
) -> anyhow::Result<SocketAddr> {
    if let Some(addr) = address {
        if let Ok(addr) = addr.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let (host, port) = match addr.rsplit_once(':') {
            Some((host, p)) => (host.to_string(), p.parse()?),
            None => (addr, port),
        };
        return Ok(pipboy::network::resolve_host(&host, port).await?);
    }

    if !discover {
        anyhow::bail!("Please specify a game address or use --discover");
    }

    println!("Discovering games...");
    let options = DiscoverOptions {
        count: Some(1),
        busy_allowed: false,
        ..Default::default()
    };
    let peers = discovery::discover_all(&DiscoveryConfig::from(&config.discovery), options).await?;
    let peer = peers.first().context("No free game found")?;
    println!("Found {} at {}", peer.reply.machine_type, peer.addr.ip());
    Ok(SocketAddr::new(peer.addr.ip(), port))
}

/// Connect to a game and mirror its model
async fn run_client(
    config: Config,
    address: Option<String>,
    port: Option<u16>,
    discover: bool,
    json: Option<PathBuf>,
    save: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut net_config = NetworkConfig::from(&config.network);
    if let Some(port) = port {
        net_config.port = port;
    }

    let target = resolve_target(&config, address, net_config.port, discover).await?;

    let model = Arc::new(Model::empty());
    let mut client = Client::new(net_config, model.clone());
    let mut event_rx = client
        .take_event_receiver()
        .context("client event receiver already taken")?;

    println!("Connecting to {}...", target);
    client.connect(target).await?;
    println!("Type help for console commands. Press Ctrl+C to disconnect.\n");

    let mut console_input = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ClientEvent::Connected { server_addr } => {
                        tracing::info!("Connected to {}", server_addr);
                    }
                    ClientEvent::Disconnected { reason } => {
                        println!("Disconnected: {}", reason);
                        break;
                    }
                }
            }
            line = console_input.next_line(), if console_open => {
                console_open = console_line(&model, line);
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                tracing::info!("Mirroring {} items", model.len());
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                if let Err(e) = client.disconnect().await {
                    tracing::debug!("Disconnect: {}", e);
                }
                break;
            }
        }
    }

    if let Some(path) = &json {
        snapshot::save_json(&model, path)?;
        println!("Model exported to: {}", path.display());
    }
    if let Some(path) = &save {
        snapshot::save_channel(&model, path)?;
        println!("Model saved to: {}", path.display());
    }

    Ok(())
}

/// Mirror a game and serve the mirror.
///
/// Both sides share one model: game updates reach companions through the
/// server's update listeners, and companion commands reach the game through
/// the client's command listener.
async fn run_relay(
    config: Config,
    address: Option<String>,
    port: Option<u16>,
    discover: bool,
    listen: Option<u16>,
) -> anyhow::Result<()> {
    let mut upstream = NetworkConfig::from(&config.network);
    if let Some(port) = port {
        upstream.port = port;
    }
    let mut downstream = NetworkConfig::from(&config.network);
    if let Some(port) = listen {
        downstream.port = port;
    }

    let target = resolve_target(&config, address, upstream.port, discover).await?;

    let model = Arc::new(Model::empty());
    let mut client = Client::new(upstream, model.clone());
    let mut client_rx = client
        .take_event_receiver()
        .context("client event receiver already taken")?;
    let mut server = Server::new(downstream, model.clone(), ServerInfo::from(&config.server));
    let mut server_rx = server
        .take_event_receiver()
        .context("server event receiver already taken")?;

    println!("Connecting to {}...", target);
    client.connect(target).await?;
    let bind_addr = server.start().await?;
    println!("Relaying {} to companions on {}", target, bind_addr);
    println!("Type help for console commands. Press Ctrl+C to stop.\n");

    let mut console_input = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    loop {
        tokio::select! {
            Some(event) = client_rx.recv() => {
                match event {
                    ClientEvent::Connected { server_addr } => {
                        tracing::info!("Connected to {}", server_addr);
                    }
                    ClientEvent::Disconnected { reason } => {
                        println!("Game disconnected: {}", reason);
                        break;
                    }
                }
            }
            Some(event) = server_rx.recv() => {
                match event {
                    ServerEvent::ClientConnected { addr } => {
                        println!("+ Companion connected: {}", addr);
                    }
                    ServerEvent::ClientDisconnected { addr, reason } => {
                        println!("- Companion disconnected: {} ({})", addr, reason);
                    }
                    ServerEvent::Started { bind_addr } => {
                        tracing::debug!("Relay listening on {}", bind_addr);
                    }
                    ServerEvent::Stopped => break,
                }
            }
            line = console_input.next_line(), if console_open => {
                console_open = console_line(&model, line);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if client.is_connected().await {
        if let Err(e) = client.disconnect().await {
            tracing::debug!("Disconnect: {}", e);
        }
    }
    if server.is_running() {
        server.stop().await?;
    }
    tracing::info!("Relay stopped");

    Ok(())
}

/// Run one line of console input against `model`.
///
/// Returns whether the console should keep reading.
fn console_line(model: &Model, line: std::io::Result<Option<String>>) -> bool {
    match line {
        Ok(Some(line)) => {
            match console::execute(model, &line) {
                Ok(Some(output)) => println!("{}", output),
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
            true
        }
        Ok(None) => {
            tracing::debug!("Console input closed");
            false
        }
        Err(e) => {
            tracing::warn!("Console input failed: {}", e);
            false
        }
    }
}

/// List games answering a discovery broadcast
async fn run_discovery(
    config: &Config,
    timeout: Option<u64>,
    count: Option<usize>,
    free_only: bool,
) -> anyhow::Result<()> {
    let discovery_config = DiscoveryConfig::from(&config.discovery);
    let options = DiscoverOptions {
        timeout: timeout.map(Duration::from_secs),
        count,
        busy_allowed: !free_only,
    };
    let scan = options
        .timeout
        .unwrap_or_else(|| Duration::from_millis(discovery_config.timeout_ms));

    println!("Scanning for games ({} seconds)...\n", scan.as_secs());

    let peers = discovery::discover(&discovery_config, options).await?;
    futures::pin_mut!(peers);

    let mut found = 0;
    while let Some(peer) = peers.next().await {
        found += 1;
        println!(
            "  {:<8} {:<16} {}",
            peer.reply.machine_type,
            peer.addr.ip(),
            if peer.reply.is_busy { "busy" } else { "free" }
        );
    }

    println!("\nDiscovery complete: {} found.", found);
    Ok(())
}

/// Convert a snapshot file to JSON
fn export(input: &Path, asset: bool, output: Option<&Path>) -> anyhow::Result<()> {
    let items = if asset {
        snapshot::load_asset(input)?
    } else {
        snapshot::load_channel(input)?
    };

    let model = Model::empty();
    model.load(items);

    match output {
        Some(path) => {
            snapshot::save_json(&model, path)?;
            println!("Exported to: {}", path.display());
        }
        None => {
            let document = literal::dump_model(&model, ROOT).context("Snapshot has no root item")?;
            println!("{}", literal::to_document(&document)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["pipboy", "export", "state.bin", "--asset"]).unwrap();
        assert!(matches!(cli.command, Commands::Export { asset: true, .. }));

        let cli = Cli::try_parse_from(["pipboy", "-v", "connect", "10.0.0.2"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Connect { discover: false, .. }));

        assert!(Cli::try_parse_from(["pipboy", "connect", "10.0.0.2", "--discover"]).is_err());

        let cli = Cli::try_parse_from(["pipboy", "relay", "10.0.0.2", "--listen", "27001"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Relay { listen: Some(27001), discover: false, .. }
        ));
    }

    #[test]
    fn test_console_line_keeps_reading_until_eof() {
        let model = Model::new();
        assert!(console_line(&model, Ok(Some("set $.Status.IsInVats true".to_string()))));
        let id = model.get_id("$.Status.IsInVats").unwrap();
        assert_eq!(model.get_item(id), Some(pipboy::model::Value::Bool(true)));

        assert!(console_line(&model, Ok(Some("bogus".to_string()))));
        assert!(!console_line(&model, Ok(None)));
        assert!(!console_line(
            &model,
            Err(std::io::Error::new(std::io::ErrorKind::Other, "closed"))
        ));
    }

    #[tokio::test]
    async fn test_resolve_explicit_target() {
        let config = Config::default();
        let addr = resolve_target(&config, Some("127.0.0.1:1234".into()), 27000, false)
            .await
            .unwrap();
        assert_eq!(addr.port(), 1234);

        let addr = resolve_target(&config, Some("127.0.0.1".into()), 27000, false)
            .await
            .unwrap();
        assert_eq!(addr.port(), 27000);

        assert!(resolve_target(&config, None, 27000, false).await.is_err());
    }
}
