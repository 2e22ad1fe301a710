//! Session configuration.

use std::time::Duration;

use peerdrop_types::{
    CHUNK_SIZE, DEFAULT_RELAY_URL, DEFAULT_STUN_SERVER, HIGH_WATER_MARK, LOW_WATER_MARK,
};

use crate::session::ClientError;

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// WebSocket URL of the relay.
    pub relay_url: String,
    /// Size of one binary chunk frame.
    pub chunk_size: usize,
    /// Buffered bytes at which chunk sending suspends.
    pub high_water_mark: usize,
    /// Buffered bytes at which suspended chunk sending resumes.
    pub low_water_mark: usize,
    /// ICE server URLs handed to the peer factory.
    pub ice_servers: Vec<String>,
    /// Interval of the connection-health sampler (`None` disables it).
    pub health_interval: Option<Duration>,
    /// Capacity of the session event broadcast.
    pub event_capacity: usize,
}

impl SessionConfig {
    /// Create a configuration for the relay at `relay_url`.
    pub fn new(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            ..Self::default()
        }
    }

    /// Set the chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the high-water mark.
    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// Set the low-water mark.
    pub fn with_low_water_mark(mut self, bytes: usize) -> Self {
        self.low_water_mark = bytes;
        self
    }

    /// Replace the ICE server list.
    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Enable the connection-health sampler.
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = Some(interval);
        self
    }

    /// Set the capacity of the session event broadcast.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check that the flow-control settings are usable.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.chunk_size == 0 {
            return Err(ClientError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.low_water_mark >= self.high_water_mark {
            return Err(ClientError::InvalidConfig(format!(
                "low_water_mark ({}) must be below high_water_mark ({})",
                self.low_water_mark, self.high_water_mark
            )));
        }
        if self.event_capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "event_capacity must be greater than zero".into(),
            ));
        }
        if self.health_interval == Some(Duration::ZERO) {
            return Err(ClientError::InvalidConfig(
                "health_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            chunk_size: CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            low_water_mark: LOW_WATER_MARK,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            health_interval: None,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.relay_url, "ws://localhost:3001/ws");
        assert_eq!(config.chunk_size, 16 * 1024);
        assert_eq!(config.high_water_mark, 160 * 1024);
        assert_eq!(config.low_water_mark, 64 * 1024);
        assert_eq!(config.ice_servers, vec!["stun:stun.l.google.com:19302"]);
        assert!(config.health_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = SessionConfig::new("ws://relay.example/ws")
            .with_chunk_size(1024)
            .with_high_water_mark(8192)
            .with_low_water_mark(2048)
            .with_health_interval(Duration::from_secs(1))
            .with_event_capacity(16);
        assert_eq!(config.relay_url, "ws://relay.example/ws");
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.health_interval, Some(Duration::from_secs(1)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = SessionConfig::default().with_chunk_size(0);
        assert!(matches!(
            config.validate(),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_inverted_water_marks() {
        let config = SessionConfig::default()
            .with_high_water_mark(1000)
            .with_low_water_mark(1000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_event_capacity() {
        let config = SessionConfig::default().with_event_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(ClientError::InvalidConfig(reason)) if reason.contains("event_capacity")
        ));
    }
}
