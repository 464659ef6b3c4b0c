//! Rate-shaping helpers on the tokio clock
//!
//! [`Throttle`] lets the first call of a burst through and drops the rest
//! until its interval has passed (manual refresh button). [`Debounce`] waits
//! for a burst to go quiet before acting (GPS sample storms).

use std::time::Duration;
use tokio::time::Instant;

/// Leading-edge throttle
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_pass: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_pass: None,
        }
    }

    /// Returns true at most once per `min_interval`
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        match self.last_pass {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_pass = Some(now);
                true
            }
        }
    }
}

/// Trailing-edge debounce
#[derive(Debug)]
pub struct Debounce {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    /// Pushes the deadline `quiet` into the future
    pub fn poke(&mut self) {
        self.deadline = Some(Instant::now() + self.quiet);
    }

    /// Resolves once no poke has happened for `quiet`, then disarms.
    /// Pending forever while disarmed, so it can sit in a `select!`.
    pub async fn settled(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}
