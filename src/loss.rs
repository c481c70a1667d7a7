//! Loss-decision model for simulated packet loss.
//!
//! The tracker drops probes based on a configured probability, independent of
//! actual network conditions.  The decision is behind the [`LossModel`] trait
//! so tests can substitute a deterministic implementation for the random
//! draw.

use rand::Rng;

/// Decides, per probe, whether to simulate loss.
pub trait LossModel {
    /// Returns `true` when the probe should be treated as lost.
    ///
    /// `percent` is the configured loss probability in `0..=100`.
    fn decide(&mut self, percent: u8) -> bool;
}

/// Production model: uniform draw in `[0, 100)` against the configured
/// percentage.  0 never loses; 100 always loses.
#[derive(Debug, Default)]
pub struct RandomLoss;

impl LossModel for RandomLoss {
    fn decide(&mut self, percent: u8) -> bool {
        rand::rng().random_range(0..100u8) < percent
    }
}

/// Deterministic test double: always (or never) lose.
#[derive(Debug, Clone, Copy)]
pub struct FixedLoss(pub bool);

impl LossModel for FixedLoss {
    fn decide(&mut self, _percent: u8) -> bool {
        self.0
    }
}
