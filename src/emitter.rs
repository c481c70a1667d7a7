//! Probe Emitter — the client role.
//!
//! The emitter drives a fixed-cadence loop: encode a probe with the current
//! sequence number and clock, send it, then wait briefly for the reply.  A
//! reply that arrives in time is printed and counted, and the loop sleeps
//! the inter-probe interval before the next round.  A timeout means the
//! probe (or its reply) is presumed lost and the loop goes straight back to
//! the next send.  The sequence number advances either way.
//!
//! A reply that does not decode at all aborts the loop — the server is the
//! only expected peer, so garbage from it means the run is meaningless.
//! Final statistics are reported in every case.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::socket::{bind_with_retry, Socket, SocketError};
use crate::wire::{unix_micros_now, Probe, Reply};

/// First local port the emitter tries to bind.
pub const DEFAULT_LOCAL_PORT: u16 = 12345;

/// Pause between successive probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(3);

/// How long to wait for a reply before presuming the probe lost.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Emitter configuration.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Address of the session tracker.
    pub server: SocketAddr,
    /// Stop after this many probes; `None` runs until interrupted.
    pub count: Option<u64>,
    /// Pause between probes; shrink in tests.
    pub probe_interval: Duration,
    /// Per-probe reply wait; shrink in tests.
    pub reply_timeout: Duration,
    /// First local port to try binding.
    pub local_port: u16,
}

impl EmitterConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            count: None,
            probe_interval: PROBE_INTERVAL,
            reply_timeout: REPLY_TIMEOUT,
            local_port: DEFAULT_LOCAL_PORT,
        }
    }
}

/// Send/receive counters for the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Probes sent.
    pub sent: u64,
    /// Replies received in time.
    pub received: u64,
    /// Unix microseconds when the run started.
    pub started_at: u64,
}

impl RunStats {
    /// Percentage of probes that went unanswered.
    ///
    /// Reports `0.0` before anything was sent rather than dividing by zero.
    pub fn loss_percentage(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (1.0 - self.received as f64 / self.sent as f64) * 100.0
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics:")?;
        writeln!(f, "Probes sent:      {}", self.sent)?;
        writeln!(f, "Replies received: {}", self.received)?;
        write!(f, "Packet loss:      {:.2}%", self.loss_percentage())
    }
}

/// What came of the reply wait for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyWait {
    /// A well-formed reply arrived and was counted.
    Replied,
    /// Timeout or recoverable receive error; the probe is presumed lost.
    Lost,
    /// Shutdown signal or an undecodable reply; the loop must stop.
    Stop,
}

/// The client role: probe cadence + local statistics.
pub struct Emitter {
    socket: Socket,
    config: EmitterConfig,
    /// Counters mutated by the loop and reported at shutdown.
    pub stats: RunStats,
    seq: u64,
}

impl Emitter {
    /// Bind a local socket per `config` and return a ready emitter.
    ///
    /// The local port starts at `config.local_port` and advances past taken
    /// ports up to a bound.
    pub async fn bind(config: EmitterConfig) -> Result<Self, SocketError> {
        let socket = bind_with_retry(config.local_port).await?;
        Ok(Self::from_socket(socket, config))
    }

    /// Build an emitter around an already-bound socket (used by tests).
    pub fn from_socket(socket: Socket, config: EmitterConfig) -> Self {
        Self {
            socket,
            config,
            stats: RunStats {
                started_at: unix_micros_now(),
                ..RunStats::default()
            },
            seq: 1,
        }
    }

    /// Local address the emitter is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Run the probe loop until `shutdown` fires, the configured count is
    /// reached, or a reply fails to decode.  Returns the final statistics.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RunStats {
        loop {
            if let Some(limit) = self.config.count {
                if self.stats.sent >= limit {
                    break;
                }
            }

            let probe = Probe {
                seq: self.seq,
                sent_at: unix_micros_now(),
            };
            let wait = match self
                .socket
                .send_to(probe.encode().as_bytes(), self.config.server)
                .await
            {
                Ok(()) => {
                    self.stats.sent += 1;
                    log::info!("[emitter] probe seq={} -> {}", probe.seq, self.config.server);
                    self.await_reply(probe.seq, &mut shutdown).await
                }
                Err(e) => {
                    log::warn!("[emitter] failed to send probe seq={}: {e}", probe.seq);
                    ReplyWait::Lost
                }
            };
            if wait == ReplyWait::Stop {
                break;
            }

            // The sequence number advances even when no reply came back.
            self.seq += 1;

            if let Some(limit) = self.config.count {
                if self.stats.sent >= limit {
                    break;
                }
            }

            // Only an answered probe earns the inter-probe pause; a presumed-
            // lost one loops straight back to the next send.
            if wait == ReplyWait::Replied {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.config.probe_interval) => {}
                }
            }
        }
        self.stats
    }

    /// Wait for one reply to the probe just sent.
    ///
    /// [`ReplyWait::Stop`] means the loop must end (shutdown signal or a
    /// reply that fails to decode).  Timeouts and recoverable socket errors
    /// come back as [`ReplyWait::Lost`], counting nothing.
    async fn await_reply(&mut self, seq: u64, shutdown: &mut watch::Receiver<bool>) -> ReplyWait {
        tokio::select! {
            _ = shutdown.changed() => ReplyWait::Stop,
            res = timeout(self.config.reply_timeout, self.socket.recv_from()) => match res {
                Ok(Ok((buf, from))) => match Reply::decode(&buf) {
                    Ok(reply) => {
                        println!("{}", String::from_utf8_lossy(&buf));
                        log::debug!(
                            "[emitter] reply from {from}: delay {:?}, {} lost in between",
                            reply.delay,
                            reply.lost_since_reply
                        );
                        self.stats.received += 1;
                        ReplyWait::Replied
                    }
                    Err(e) => {
                        log::error!("[emitter] unexpected reply from {from}: {e}; stopping");
                        ReplyWait::Stop
                    }
                },
                Ok(Err(e)) => {
                    log::warn!("[emitter] receive failed for seq={seq}: {e}");
                    ReplyWait::Lost
                }
                Err(_elapsed) => {
                    log::warn!("[emitter] no reply for seq={seq}; presumed lost");
                    ReplyWait::Lost
                }
            }
        }
    }
}
