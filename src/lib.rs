//! `udp-heartbeat` — a UDP heartbeat client/server pair with simulated
//! packet loss and per-client delay accounting.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  "<seq>\t<micros>"   ┌──────────┐
//!  │ Emitter  │─────────────────────▶│ Tracker  │──▶ loss draw
//!  │ (client) │                      │ (server) │     │ kept
//!  └────▲─────┘   delay + losses     └────┬─────┘     ▼
//!       └──────────────────────────────── reply  (session table)
//! ```
//!
//! Each module has a single responsibility:
//! - [`wire`]    — probe/reply text wire format (encode / decode)
//! - [`loss`]    — pluggable loss-decision model
//! - [`session`] — per-client accounting records and the session table
//! - [`tracker`] — server receive loop, loss simulation, shutdown report
//! - [`emitter`] — client probe cadence, run statistics, shutdown report
//! - [`socket`]  — async UDP socket abstraction + bounded bind retry

pub mod emitter;
pub mod loss;
pub mod session;
pub mod socket;
pub mod tracker;
pub mod wire;

pub use emitter::{Emitter, EmitterConfig, RunStats};
pub use loss::{FixedLoss, LossModel, RandomLoss};
pub use session::{Session, SessionTable};
pub use socket::{bind_with_retry, Socket, SocketError};
pub use tracker::{Tracker, TrackerConfig, TrackerReport};
pub use wire::{Probe, Reply, WireError};
