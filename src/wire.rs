//! Wire-format definitions for heartbeat datagrams.
//!
//! Every datagram exchanged between peers is either a [`Probe`] (client →
//! server) or a [`Reply`] (server → client).  This module is responsible for:
//! - Defining the on-wire text layout of both message kinds.
//! - Serialising messages into datagram payloads ready for transmission.
//! - Deserialising raw payloads back into messages, returning typed errors
//!   for malformed input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! Both messages are UTF-8 text.  Timestamps travel as integer microseconds
//! since the Unix epoch, so no locale-dependent date parsing is involved.
//!
//! ```text
//! Probe:  <seq>\t<sent_at_micros>
//! Reply:  Packet delivery delay = <micros>us, Number of packets lost in between = <n>
//! ```
//!
//! Sequence numbers start at 1 and increase by one per probe.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Text preceding the delay field in a reply.
const REPLY_DELAY_PREFIX: &str = "Packet delivery delay = ";
/// Text separating the delay field from the loss count.
const REPLY_LOSS_SEP: &str = "us, Number of packets lost in between = ";

/// Errors that can arise when parsing a raw datagram payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8")]
    NotText,
    /// A required field is absent (e.g. probe without a tab-separated timestamp).
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// A field failed to parse as an integer.
    #[error("invalid {field}: {value:?}")]
    InvalidInt { field: &'static str, value: String },
}

/// Microseconds elapsed since the Unix epoch, per the local clock.
///
/// Pre-1970 clocks collapse to 0 rather than panicking.
pub fn unix_micros_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn parse_u64(field: &'static str, s: &str) -> Result<u64, WireError> {
    s.trim().parse().map_err(|_| WireError::InvalidInt {
        field,
        value: s.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// One outbound heartbeat datagram: sequence number + send timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Monotonically increasing per client, starting at 1.
    pub seq: u64,
    /// Emitter's clock at send time, in Unix microseconds.
    pub sent_at: u64,
}

impl Probe {
    /// Serialise this probe into a datagram payload.
    pub fn encode(&self) -> String {
        format!("{}\t{}", self.seq, self.sent_at)
    }

    /// Parse a [`Probe`] from a raw datagram payload.
    ///
    /// Returns [`Err`] if the payload is not text, has no tab-separated
    /// timestamp field, or either field is not an integer.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(buf).map_err(|_| WireError::NotText)?;
        let (seq, sent_at) = text
            .split_once('\t')
            .ok_or(WireError::MissingField("timestamp"))?;
        Ok(Probe {
            seq: parse_u64("sequence number", seq)?,
            sent_at: parse_u64("timestamp", sent_at)?,
        })
    }

    /// Observed one-way delay against a receipt time in Unix microseconds.
    ///
    /// Saturates at zero when the probe timestamp is ahead of the receiving
    /// clock (unsynchronised hosts).
    pub fn delay_until(&self, received_at: u64) -> Duration {
        Duration::from_micros(received_at.saturating_sub(self.sent_at))
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// The server's response: measured delay + losses since the previous reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    /// Delay between probe send time and server receipt time.
    pub delay: Duration,
    /// Probes simulated as lost since the last reply to this client.
    pub lost_since_reply: u64,
}

impl Reply {
    /// Serialise this reply into a datagram payload.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}",
            REPLY_DELAY_PREFIX,
            self.delay.as_micros(),
            REPLY_LOSS_SEP,
            self.lost_since_reply
        )
    }

    /// Parse a [`Reply`] from a raw datagram payload.
    ///
    /// Anything that does not match the reply shape exactly — including the
    /// server's free-text diagnostic for malformed probes — is an error.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(buf).map_err(|_| WireError::NotText)?;
        let rest = text
            .strip_prefix(REPLY_DELAY_PREFIX)
            .ok_or(WireError::MissingField("delay"))?;
        let (delay, lost) = rest
            .split_once(REPLY_LOSS_SEP)
            .ok_or(WireError::MissingField("loss count"))?;
        Ok(Reply {
            delay: Duration::from_micros(parse_u64("delay", delay)?),
            lost_since_reply: parse_u64("loss count", lost)?,
        })
    }
}
