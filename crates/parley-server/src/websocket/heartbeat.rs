//! Ping/pong liveness tracking.
//!
//! The write pump pings on a fixed interval and, on each tick, checks how
//! long ago the read pump last heard from the peer. Any inbound frame counts
//! as a sign of life, not only pongs.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Ping ticker whose first tick fires one full interval from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn silent_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.silent_for() > timeout
    }
}
