//! Servfail hangover: a single cool-off timestamp guarded by a reader/writer lock.
//!
//! A misconfigured or unreachable server yields fast, cheap failures instead of a
//! hot retry loop: once `arm` fires, every query short-circuits to a synthesized
//! SERVFAIL until the cool-off window elapses.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

const HANGOVER_DURATION: Duration = Duration::from_secs(10);

pub struct HangoverGate {
    expiration: RwLock<Instant>,
}

impl HangoverGate {
    pub fn new() -> Self {
        Self {
            // `now` satisfies `now >= expiration`, i.e. starts clear.
            expiration: RwLock::new(Instant::now()),
        }
    }

    /// True while the forwarder is still cooling off.
    pub fn in_hangover(&self) -> bool {
        Instant::now() < *self.expiration.read()
    }

    /// Arms the cool-off window for [`HANGOVER_DURATION`] from now.
    pub fn arm(&self) {
        *self.expiration.write() = Instant::now() + HANGOVER_DURATION;
    }
}

impl Default for HangoverGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let gate = HangoverGate::new();
        assert!(!gate.in_hangover());
    }

    #[test]
    fn arm_enters_hangover() {
        let gate = HangoverGate::new();
        gate.arm();
        assert!(gate.in_hangover());
    }
}
