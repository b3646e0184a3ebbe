//! `tellie_server`: owns the serial link to one control box and serves the
//! `tellie.Tellie` gRPC service.
//!
//! ```bash
//! tellie_server --config config/tellie.toml
//! tellie_server --simulate --listen 127.0.0.1:5030
//! RUST_LOG=tellie_control=debug tellie_server --port /dev/ttyUSB1
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tellie_control::adapters::open_link;
use tellie_control::app_actor;
use tellie_control::config::TellieConfig;
use tellie_control::device::DeviceSession;
use tellie_control::protocol::{Codec, TransportSession};
use tellie_control::rpc::{TellieServer, TellieService};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serve the TELLIE pulser control box over gRPC.
#[derive(Parser, Debug)]
#[command(name = "tellie_server", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "config/tellie.toml")]
    config: PathBuf,

    /// Serial port, overriding `serial.port`.
    #[arg(long)]
    port: Option<String>,

    /// Listen address, overriding `server.listen_addr`.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Drive the built-in simulated box instead of a serial port.
    #[arg(long)]
    simulate: bool,

    /// Skip the RTS reset at start-up.
    #[arg(long)]
    no_reset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TellieConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if cli.simulate {
        config.serial.simulate = true;
    }
    if cli.no_reset {
        config.serial.reset_on_start = false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level))
        .add_directive("h2=warn".parse()?)
        .add_directive("tower=warn".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = match cli.listen {
        Some(addr) => addr,
        None => config.listen_addr()?,
    };
    info!(
        name = %config.application.name,
        port = %config.serial.port,
        simulate = config.serial.simulate,
        chip = ?config.protocol.chip,
        "Starting tellie_server"
    );

    let link = open_link(&config.serial).context("Failed to open the control box link")?;
    let transport = TransportSession::new(
        link,
        Codec::new(config.protocol.chip),
        config.session_options(),
    );
    let mut session = DeviceSession::new(transport, config.readout_timing());
    session
        .initialise(config.serial.reset_on_start && !config.serial.simulate)
        .await
        .context("Failed to initialise the control box")?;

    let (device, worker) = app_actor::spawn(session, config.server.queue_capacity);
    let service = TellieService::new(device.clone());

    info!(%addr, "gRPC server listening");
    tonic::transport::Server::builder()
        .add_service(TellieServer::new(service))
        .serve_with_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown requested");
        })
        .await
        .context("gRPC server failed")?;

    device
        .shutdown()
        .await
        .context("Device worker did not shut down cleanly")?;
    worker.await.context("Device worker panicked")?;
    info!("tellie_server stopped");
    Ok(())
}
