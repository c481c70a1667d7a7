//! Per-client accounting records and the session table.
//!
//! The tracker keeps one [`Session`] per distinct client address, created on
//! the first probe from that address and kept until process exit.  Counter
//! invariant: `received ≥ lost`, and `lost_since_reply` resets to zero
//! exactly when a reply is sent, otherwise it only grows.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Accounting record for one client address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Total probes received from this address.
    pub received: u64,
    /// Total probes simulated as lost, lifetime.
    pub lost: u64,
    /// Probes lost since the last reply sent to this address.
    pub lost_since_reply: u64,
    /// Receipt time of the most recent probe, in Unix microseconds.
    pub last_seen: u64,
}

impl Session {
    /// Record a probe receipt: bump `received`, stamp `last_seen`.
    pub fn touch(&mut self, now: u64) {
        self.received += 1;
        self.last_seen = now;
    }

    /// Record a simulated loss for the most recent probe.
    pub fn record_loss(&mut self) {
        self.lost += 1;
        self.lost_since_reply += 1;
    }

    /// Take the interim loss count for a reply, resetting it to zero.
    pub fn take_lost_since_reply(&mut self) -> u64 {
        std::mem::take(&mut self.lost_since_reply)
    }

    /// Lifetime loss percentage for this session.
    ///
    /// A session that has received nothing reports `0.0` rather than
    /// dividing by zero.
    pub fn loss_percentage(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.lost as f64 / self.received as f64 * 100.0
        }
    }
}

/// Owned map from client address to its [`Session`].
///
/// Entries are created on first contact and never removed; the table lives
/// as long as the tracker.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SocketAddr, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for `addr`, creating it on first contact.
    pub fn entry(&mut self, addr: SocketAddr) -> &mut Session {
        self.sessions.entry(addr).or_default()
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Session> {
        self.sessions.get(addr)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate over all sessions in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&SocketAddr, &Session)> {
        self.sessions.iter()
    }

    /// Snapshot all sessions sorted by address, for deterministic reporting.
    pub fn sorted(&self) -> Vec<(SocketAddr, Session)> {
        let mut all: Vec<_> = self
            .sessions
            .iter()
            .map(|(addr, s)| (*addr, s.clone()))
            .collect();
        all.sort_by_key(|(addr, _)| *addr);
        all
    }
}
