//! Connection supervision
//!
//! When the munin-node closes the stream, the protocol client hands control to
//! the [`ConnectionSupervisor`], which keeps trying to open a fresh connection
//! (banner included) according to its [`RetryPolicy`].

use super::*;
use crate::protocol::Connection;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed-delay reconnect policy
///
/// The production policy retries forever with a one second pause between
/// attempts. Tests inject a bounded policy so a missing munin-node ends the
/// loop with an error instead of blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Retry forever with `delay` between attempts
    pub fn unbounded(delay: Duration) -> Self {
        Self::new(delay, None)
    }

    /// Give up after `max_attempts` failed attempts
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self::new(delay, Some(max_attempts))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether another attempt may follow the given failed attempt number
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(1))
    }
}

/// Re-establishes the munin-node connection after the stream ended
#[derive(Debug, Default)]
pub struct ConnectionSupervisor {
    policy: RetryPolicy,
    attempts: u64,
    reconnects: u64,
}

impl ConnectionSupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            reconnects: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Total connect attempts made by this supervisor
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Successful reconnects performed by this supervisor
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Open a new connection to `address`, retrying per policy
    ///
    /// Returns once a connection with a valid banner is live. With an unbounded
    /// policy this only returns on success.
    pub async fn establish(&mut self, address: &str) -> Result<Connection> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.attempts += 1;

            match Connection::open(address).await {
                Ok(connection) => {
                    self.reconnects += 1;
                    info!(
                        attempt,
                        hostname = connection.hostname(),
                        "Reconnected to munin-node"
                    );
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Couldn't reconnect");

                    if !self.policy.allows_retry_after(attempt) {
                        return Err(connection_error(
                            address,
                            format!("giving up after {attempt} attempts: {e}"),
                        ));
                    }

                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }
}
