//! Session Tracker — the server role.
//!
//! The tracker owns the session table and runs an unbounded receive loop.
//! Every loop iteration produces exactly one [`RecvOutcome`], dispatched by a
//! single `match`:
//!
//! | Outcome       | Action                                                  |
//! |---------------|---------------------------------------------------------|
//! | `Probe`       | account the probe, run the loss draw, maybe reply       |
//! | `Malformed`   | send a diagnostic line back, keep serving               |
//! | `TimedOut`    | log an operator notice (no traffic for a while)         |
//! | `Interrupted` | stop and produce the [`TrackerReport`]                  |
//!
//! A probe that survives the loss draw is answered with the observed
//! one-way delay plus the number of probes lost since the previous reply to
//! that client; the interim counter then resets to zero.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::loss::{LossModel, RandomLoss};
use crate::session::{Session, SessionTable};
use crate::socket::{bind_with_retry, Socket, SocketError};
use crate::wire::{unix_micros_now, Probe, Reply, WireError};

/// Port the tracker serves on when none is given.
pub const DEFAULT_PORT: u16 = 12000;

/// Simulated loss percentage when none is given.
pub const DEFAULT_LOSS_PERCENT: u8 = 40;

/// How long the receive loop waits with no traffic before logging a notice.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Port to serve on.  `None` means [`DEFAULT_PORT`].  The default port —
    /// whether implied or typed out — auto-advances to the next free port
    /// when taken; any other explicit port is bound exactly once and failure
    /// is fatal.
    pub port: Option<u16>,
    /// Probability (0–100) that any given probe is simulated as lost.
    pub loss_percent: u8,
    /// Idle notice threshold; shrink in tests.
    pub idle_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            port: None,
            loss_percent: DEFAULT_LOSS_PERCENT,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

/// Result of one receive attempt.
#[derive(Debug)]
enum RecvOutcome {
    /// A well-formed probe arrived.
    Probe { probe: Probe, from: SocketAddr },
    /// A datagram arrived but did not decode as a probe.
    Malformed { from: SocketAddr, err: WireError },
    /// No traffic within the idle timeout.
    TimedOut,
    /// The shutdown signal fired.
    Interrupted,
}

/// The server role: session table + loss simulation + delay measurement.
pub struct Tracker {
    socket: Socket,
    /// Per-client accounting, keyed by sender address.
    pub sessions: SessionTable,
    loss: Box<dyn LossModel + Send + Sync>,
    loss_percent: u8,
    idle_timeout: Duration,
    /// Unix microseconds at successful bind.
    started_at: u64,
}

impl Tracker {
    /// Bind per `config` and return a ready tracker.
    ///
    /// Targeting [`DEFAULT_PORT`] — by omission or explicitly — advances
    /// past taken ports up to a bound.  Any other port gets exactly one
    /// attempt so the operator can pick an alternative themselves.
    pub async fn bind(config: TrackerConfig) -> Result<Self, SocketError> {
        let port = config.port.unwrap_or(DEFAULT_PORT);
        let socket = if port == DEFAULT_PORT {
            bind_with_retry(DEFAULT_PORT).await?
        } else {
            Socket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?
        };
        Ok(Self::from_socket(socket, config))
    }

    /// Build a tracker around an already-bound socket (used by tests to bind
    /// on loopback with an OS-assigned port).
    pub fn from_socket(socket: Socket, config: TrackerConfig) -> Self {
        Self {
            socket,
            sessions: SessionTable::new(),
            loss: Box::new(RandomLoss),
            loss_percent: config.loss_percent,
            idle_timeout: config.idle_timeout,
            started_at: unix_micros_now(),
        }
    }

    /// Swap the loss model (tests inject [`crate::loss::FixedLoss`]).
    pub fn with_loss_model(mut self, model: Box<dyn LossModel + Send + Sync>) -> Self {
        self.loss = model;
        self
    }

    /// Address the tracker is serving on.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Run the receive loop until `shutdown` fires, then return the report.
    ///
    /// Socket errors inside the loop are logged and the loop continues; only
    /// the shutdown signal ends it.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> TrackerReport {
        loop {
            match self.next_outcome(&mut shutdown).await {
                Ok(RecvOutcome::Probe { probe, from }) => {
                    let reply = self.process_probe(&probe, from, unix_micros_now());
                    if let Some(reply) = reply {
                        match self.socket.send_to(reply.encode().as_bytes(), from).await {
                            Ok(()) => log::info!(
                                "[tracker] replied to {from}: delay {:?}, {} lost in between",
                                reply.delay,
                                reply.lost_since_reply
                            ),
                            Err(e) => log::warn!("[tracker] failed to reply to {from}: {e}"),
                        }
                    }
                }
                Ok(RecvOutcome::Malformed { from, err }) => {
                    log::warn!("[tracker] unrecognized probe from {from}: {err}");
                    let diagnostic =
                        format!("unrecognized probe: {err}; expected \"<seq>\\t<unix_micros>\"");
                    if let Err(e) = self.socket.send_to(diagnostic.as_bytes(), from).await {
                        log::warn!("[tracker] failed to send diagnostic to {from}: {e}");
                    }
                }
                Ok(RecvOutcome::TimedOut) => {
                    log::warn!(
                        "[tracker] no probes for {:?}; close with Ctrl-C if all clients are done",
                        self.idle_timeout
                    );
                }
                Ok(RecvOutcome::Interrupted) => {
                    log::info!("[tracker] shutting down");
                    break;
                }
                Err(e) => log::error!("[tracker] receive failed: {e}"),
            }
        }
        self.report()
    }

    /// Wait for the next datagram, idle timeout, or shutdown signal.
    async fn next_outcome(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RecvOutcome, SocketError> {
        tokio::select! {
            _ = shutdown.changed() => Ok(RecvOutcome::Interrupted),
            res = timeout(self.idle_timeout, self.socket.recv_from()) => match res {
                Ok(Ok((buf, from))) => Ok(match Probe::decode(&buf) {
                    Ok(probe) => RecvOutcome::Probe { probe, from },
                    Err(err) => RecvOutcome::Malformed { from, err },
                }),
                Ok(Err(e)) => Err(e),
                Err(_elapsed) => Ok(RecvOutcome::TimedOut),
            }
        }
    }

    /// Account one probe and decide its fate.
    ///
    /// Returns `Some(reply)` when the probe survives the loss draw, `None`
    /// when loss is simulated.  `now` is the receipt time in Unix
    /// microseconds.  Pure accounting — no I/O — so tests drive it directly.
    pub fn process_probe(&mut self, probe: &Probe, from: SocketAddr, now: u64) -> Option<Reply> {
        let session = self.sessions.entry(from);
        session.touch(now);
        log::info!(
            "[tracker] probe seq={} from {from} ({} received so far)",
            probe.seq,
            session.received
        );

        if self.loss.decide(self.loss_percent) {
            session.record_loss();
            log::info!("[tracker] simulating loss for {from}");
            return None;
        }

        Some(Reply {
            delay: probe.delay_until(now),
            lost_since_reply: session.take_lost_since_reply(),
        })
    }

    /// Snapshot uptime and every session for the shutdown summary.
    pub fn report(&self) -> TrackerReport {
        TrackerReport {
            port: self.socket.local_addr.port(),
            loss_percent: self.loss_percent,
            started_at: self.started_at,
            ended_at: unix_micros_now(),
            sessions: self.sessions.sorted(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shutdown report
// ---------------------------------------------------------------------------

/// End-of-run summary over every session, rendered as a table.
#[derive(Debug, Clone)]
pub struct TrackerReport {
    pub port: u16,
    pub loss_percent: u8,
    pub started_at: u64,
    pub ended_at: u64,
    /// Sessions sorted by client address.
    pub sessions: Vec<(SocketAddr, Session)>,
}

impl TrackerReport {
    /// Total time the tracker served.
    pub fn uptime(&self) -> Duration {
        Duration::from_micros(self.ended_at.saturating_sub(self.started_at))
    }
}

/// Render Unix microseconds as `seconds.micros` for the summary table.
fn fmt_unix_micros(micros: u64) -> String {
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}

impl fmt::Display for TrackerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ruler = "-".repeat(88);
        writeln!(f, "{ruler}")?;
        writeln!(f, "Summary")?;
        writeln!(f, "{ruler}")?;
        writeln!(
            f,
            "Served on port {} with {}% simulated loss; uptime {:?}",
            self.port,
            self.loss_percent,
            self.uptime()
        )?;
        writeln!(f, "{ruler}")?;
        writeln!(
            f,
            "{:<24}{:>18}{:>20}{:>26}",
            "Client", "Probes received", "Loss percentage", "Last heartbeat"
        )?;
        for (addr, session) in &self.sessions {
            writeln!(
                f,
                "{:<24}{:>18}{:>19.2}%{:>26}",
                addr.to_string(),
                session.received,
                session.loss_percentage(),
                fmt_unix_micros(session.last_seen)
            )?;
        }
        write!(f, "{ruler}")
    }
}
