//! Connection-health sampling.
//!
//! Periodically reads a channel's byte counters and logs throughput. The
//! sampler only observes; it never affects the transfer.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::transport::PeerChannel;

/// Throughput between two counter readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    /// Outgoing KiB per second.
    pub sent_kib_per_sec: f64,
    /// Incoming KiB per second.
    pub received_kib_per_sec: f64,
    /// Total bytes sent so far.
    pub total_sent: u64,
    /// Total bytes received so far.
    pub total_received: u64,
}

impl HealthSample {
    /// Compute throughput from two `(sent, received)` readings.
    pub fn between(previous: (u64, u64), current: (u64, u64), elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = |before: u64, after: u64| {
            if secs > 0.0 {
                after.saturating_sub(before) as f64 / 1024.0 / secs
            } else {
                0.0
            }
        };
        Self {
            sent_kib_per_sec: rate(previous.0, current.0),
            received_kib_per_sec: rate(previous.1, current.1),
            total_sent: current.0,
            total_received: current.1,
        }
    }
}

/// Spawn a sampler that logs throughput every `interval` until the
/// channel closes.
pub fn spawn_sampler<C: PeerChannel>(channel: Arc<C>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut previous = (channel.bytes_sent(), channel.bytes_received());
        let mut last = Instant::now();
        loop {
            ticker.tick().await;
            if !channel.is_open() {
                break;
            }
            let current = (channel.bytes_sent(), channel.bytes_received());
            let sample = HealthSample::between(previous, current, last.elapsed());
            info!(
                sent_kib_s = sample.sent_kib_per_sec,
                received_kib_s = sample.received_kib_per_sec,
                total_sent = sample.total_sent,
                total_received = sample.total_received,
                "Connection health"
            );
            previous = current;
            last = Instant::now();
        }
    })
}
