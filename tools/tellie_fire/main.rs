//! `tellie_fire`: load a channel on a remote `tellie_server`, fire an
//! averaged sequence and print the PIN reading.
//!
//! ```bash
//! tellie_fire --server 127.0.0.1:5030 --channel 12 --pulses 1000 --height 8000
//! tellie_fire --channel 60 --pulses 200 --delay 1.0 --json
//! ```
//!
//! Ctrl-C cancels the run; the box is stopped before the tool exits.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tellie_control::device::ChannelInit;
use tellie_control::error_recovery::{retry, RetryPolicy};
use tellie_control::orchestrator::{LoadFireRunner, RunOutcome, RunTiming};
use tellie_control::protocol::Channel;
use tellie_control::rpc::RemoteTellie;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fire one averaged sequence on a remote TELLIE box.
#[derive(Parser, Debug)]
#[command(name = "tellie_fire", version, about)]
struct Cli {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:5030")]
    server: String,

    /// Channel to fire (1-96).
    #[arg(long)]
    channel: u32,

    /// Number of pulses in the sequence.
    #[arg(long, default_value_t = 1000)]
    pulses: u32,

    /// Delay between pulses in ms.
    #[arg(long, default_value_t = 1.0)]
    delay: f64,

    /// Trigger delay in ns.
    #[arg(long, default_value_t = 0.0)]
    trigger_delay: f64,

    /// Pulse width (0-16383).
    #[arg(long, default_value_t = 0)]
    width: u16,

    /// Pulse height (0-16383).
    #[arg(long, default_value_t = 16383)]
    height: u16,

    /// Fibre delay in ns, multiple of 0.25.
    #[arg(long, default_value_t = 0.0)]
    fibre_delay: f64,

    /// Seconds to wait for the reading after the sequence should be over.
    #[arg(long, default_value_t = 5)]
    readout_timeout: u64,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = 3)]
    connect_attempts: u32,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    outcome: &'static str,
    channel: u32,
    mean: Option<u32>,
    rms: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let channel = Channel::new(cli.channel)?;

    let policy = RetryPolicy {
        max_attempts: cli.connect_attempts,
        backoff_delay: Duration::from_millis(500),
    };
    let remote = retry(&policy, || RemoteTellie::connect(&cli.server))
        .await
        .with_context(|| format!("Failed to connect to {}", cli.server))?;

    let runner = LoadFireRunner::new(
        Arc::new(remote),
        RunTiming {
            readout_timeout: Duration::from_secs(cli.readout_timeout),
            ..RunTiming::default()
        },
    );
    let run = runner.start(ChannelInit {
        channel,
        pulse_number: cli.pulses,
        pulse_delay_ms: cli.delay,
        trigger_delay_ns: cli.trigger_delay,
        pulse_width: cli.width,
        pulse_height: cli.height,
        fibre_delay_ns: cli.fibre_delay,
    })?;
    info!(%channel, pulses = cli.pulses, "Run started, Ctrl-C to cancel");

    let cancel = run.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancelling run");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = match run.join().await? {
        RunOutcome::Completed(reading) => Report {
            outcome: "completed",
            channel: u32::from(reading.channel),
            mean: Some(reading.mean),
            rms: Some(reading.rms),
        },
        RunOutcome::Cancelled => Report {
            outcome: "cancelled",
            channel: cli.channel,
            mean: None,
            rms: None,
        },
    };

    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        match (report.mean, report.rms) {
            (Some(mean), Some(rms)) => {
                println!("Channel {}: PIN mean {} rms {:.2}", report.channel, mean, rms)
            }
            _ => println!("Channel {}: run cancelled", report.channel),
        }
    }

    if report.outcome == "cancelled" {
        bail!("Run cancelled");
    }
    Ok(())
}
