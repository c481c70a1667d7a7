//! Entry point for `heartbeat`.
//!
//! Parses CLI arguments and dispatches into either **server** (session
//! tracker) or **client** (probe emitter) mode.  All protocol work is
//! delegated to library modules; `main.rs` owns only process setup (logging,
//! signal handling, argument validation) and report printing.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use udp_heartbeat::emitter::{Emitter, EmitterConfig};
use udp_heartbeat::tracker::{Tracker, TrackerConfig, DEFAULT_LOSS_PERCENT, DEFAULT_PORT};

/// UDP heartbeat with simulated packet loss.  Stop either role with Ctrl-C
/// to print its summary.
#[derive(Parser)]
#[command(name = "heartbeat", version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Track heartbeat sessions and simulate packet loss (server role).
    Server {
        /// Port to serve on (1024-65535).  The default, 12000, advances to
        /// the next free port when taken; any other port is never retried.
        #[arg(long, value_parser = parse_port)]
        port: Option<u16>,
        /// Percentage of probes to simulate as lost (0-100).
        #[arg(long = "packet-loss", default_value_t = DEFAULT_LOSS_PERCENT, value_parser = parse_percent)]
        packet_loss: u8,
    },
    /// Send sequenced heartbeat probes to a server (client role).
    Client {
        /// The server's IPv4 address (dotted quad, a.b.c.d).
        #[arg(long = "server-ip", value_parser = parse_server_ip)]
        server_ip: Ipv4Addr,
        /// The server's port (1024-65535).
        #[arg(long = "server-port", value_parser = parse_port)]
        server_port: u16,
        /// Stop after this many probes instead of running until Ctrl-C.
        #[arg(long)]
        count: Option<u64>,
    },
}

/// Ports below 1024 are privileged and rejected up front.
fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("{s:?} is not a port number"))?;
    if port < 1024 {
        return Err(format!("port {port} is out of range (1024-65535)"));
    }
    Ok(port)
}

fn parse_percent(s: &str) -> Result<u8, String> {
    let percent: u8 = s.parse().map_err(|_| format!("{s:?} is not a percentage"))?;
    if percent > 100 {
        return Err(format!("loss percentage {percent} is out of range (0-100)"));
    }
    Ok(percent)
}

/// Dotted-quad sanity check: 7-15 characters and four in-range octets.
fn parse_server_ip(s: &str) -> Result<Ipv4Addr, String> {
    if !(7..=15).contains(&s.len()) {
        return Err(format!("{s:?} is not a dotted-quad address (a.b.c.d)"));
    }
    s.parse().map_err(|_| format!("{s:?} is not a valid IPv4 address"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    // Ctrl-C fans out to the running role through a watch channel so the
    // receive loop can unwind to its report phase instead of being killed.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    match cli.mode {
        Mode::Server { port, packet_loss } => {
            let config = TrackerConfig {
                port,
                loss_percent: packet_loss,
                ..TrackerConfig::default()
            };
            let tracker = Tracker::bind(config).await.with_context(|| {
                format!("cannot bind server on port {}", port.unwrap_or(DEFAULT_PORT))
            })?;
            println!(
                "Serving on port {} with {}% simulated packet loss",
                tracker.local_addr().port(),
                packet_loss
            );

            let report = tracker.run(shutdown_rx).await;
            println!("{report}");
        }
        Mode::Client {
            server_ip,
            server_port,
            count,
        } => {
            let config = EmitterConfig {
                count,
                ..EmitterConfig::new(SocketAddr::from((server_ip, server_port)))
            };
            let emitter = Emitter::bind(config)
                .await
                .context("cannot bind a local client port")?;
            println!("Client bound to port {}", emitter.local_addr().port());

            let stats = emitter.run(shutdown_rx).await;
            println!("{stats}");
        }
    }

    Ok(())
}
