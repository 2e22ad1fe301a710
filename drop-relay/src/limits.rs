//! Rate limiting for peerdrop-relay.
//!
//! Signaling is light: a register, a connect, one offer or answer and a
//! handful of candidates per pairing. Limits protect the relay from clients
//! that flood it anyway:
//! - **per client** (keyed by the relay-internal client id)
//! - **global** across all clients
//!
//! Both use governor rate limiters.

use crate::config::{ConfigError, LimitsConfig};
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits messages per client.
    message_limiter: Arc<DefaultKeyedRateLimiter<u64>>,
    /// Caps aggregate message throughput.
    global_limiter: Arc<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &"KeyedLimiter<u64>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

fn non_zero(value: u32, name: &str) -> Result<NonZeroU32, ConfigError> {
    NonZeroU32::new(value).ok_or_else(|| ConfigError::Invalid(format!("{name} must be > 0")))
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a configured rate is zero.
    pub fn new(config: &LimitsConfig) -> Result<Self, ConfigError> {
        let per_second = non_zero(config.messages_per_second, "limits.messages_per_second")?;
        let burst = non_zero(config.message_burst, "limits.message_burst")?;
        let global = non_zero(
            config.global_messages_per_second,
            "limits.global_messages_per_second",
        )?;

        Ok(Self {
            message_limiter: Arc::new(RateLimiter::keyed(
                Quota::per_second(per_second).allow_burst(burst),
            )),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global))),
        })
    }

    /// Check if a message from `client` is allowed.
    pub fn check_message(&self, client: u64) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)?;
        self.message_limiter
            .check_key(&client)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Number of tracked client keys (for metrics).
    pub fn tracked_clients(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict entries of idle clients from the keyed limiter.
    pub fn shrink(&self) {
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many messages from this client.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// Too many messages across all clients.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
