//! wearlink Relay
//!
//! Connects the device host's local sensor bus to the remote control plane.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use wearlink_core::RelayConfig;
use wearlink_core::config::load_config;
use wearlink_core::tracing_init::init_tracing;
use wearlink_crypto::{EnvelopeCodec, SecretKey};

use wearlink_relay::control::{parse_command, send_command};
use wearlink_relay::supervisor::{Supervisor, SupervisorConfig, TcpConnector, UnixBusConnector};

#[derive(Parser, Debug)]
#[command(name = "wearlink-relay")]
#[command(version, about = "wearlink relay - sensor bus to remote control plane bridge")]
struct Args {
    /// Path to a TOML config file (default: ~/.config/wearlink/relay.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Remote host, reached through the established tunnel.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Remote port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Shared 16-byte envelope key.
    #[arg(long, global = true)]
    key: Option<String>,

    /// Directory for session artifacts.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Log level for wearlink crates when `RUST_LOG` is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "WEARLINK_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the relay (default).
    Run,
    /// Send one command to the device host's control socket.
    Control {
        /// `resume`, `pause`, or a raw JSON command object.
        command: String,
    },
}

impl Args {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.remote.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.remote.port = port;
        }
        if let Some(key) = &self.key {
            config.crypto.key.clone_from(key);
        }
        if let Some(dir) = &self.output_dir {
            config.recording.output_dir.clone_from(dir);
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    init_tracing(&config.log_level, args.log_json)?;

    match args.command {
        None | Some(Cmd::Run) => run(config).await,
        Some(Cmd::Control { command }) => control(&config, &command).await,
    }
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    config.validate()?;
    let key = SecretKey::from_secret_str(&config.crypto.key).context("Invalid crypto.key")?;

    let remote = config.remote_addr();
    let addr = tokio::net::lookup_host(remote.as_str())
        .await
        .with_context(|| format!("Cannot resolve remote address {remote}"))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Remote address {remote} resolved to nothing"))?;

    std::fs::create_dir_all(&config.recording.output_dir).with_context(|| {
        format!(
            "Cannot create output directory {}",
            config.recording.output_dir.display()
        )
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        remote = %addr,
        data_socket = %config.bus.data_socket.display(),
        control_socket = %config.bus.control_socket.display(),
        output_dir = %config.recording.output_dir.display(),
        manifest = ?config.manifest.source,
        "Starting wearlink-relay"
    );

    let connector = TcpConnector::new(
        addr,
        Duration::from_millis(config.remote.connect_timeout_ms),
    );
    let bus = UnixBusConnector::new(
        config.bus.data_socket.clone(),
        config.bus.control_socket.clone(),
    );
    let mut supervisor = Supervisor::new(
        SupervisorConfig::from(&config),
        connector,
        bus,
        EnvelopeCodec::new(key),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut supervisor_handle = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let finished = tokio::select! {
        result = &mut supervisor_handle => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM shutdown signal");
            None
        }
    };

    let result = match finished {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(true);
            supervisor_handle.await
        }
    };

    match result.context("Supervisor task failed")? {
        Ok(stats) => {
            info!(
                connections = stats.connections,
                sessions = stats.sessions_finalized,
                "Relay stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay gave up");
            Err(e.into())
        }
    }
}

async fn control(config: &RelayConfig, arg: &str) -> anyhow::Result<()> {
    let command = parse_command(arg).ok_or_else(|| {
        anyhow::anyhow!("Unrecognised command {arg:?}; expected resume, pause or a JSON command")
    })?;

    send_command(&config.bus.control_socket, &command)
        .await
        .with_context(|| {
            format!(
                "Cannot send {command} to {}",
                config.bus.control_socket.display()
            )
        })
}
