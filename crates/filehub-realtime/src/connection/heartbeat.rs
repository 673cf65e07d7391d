//! Keepalive timing for the read and write pumps.

use std::time::Duration;

use filehub_core::config::RealtimeConfig;

/// Heartbeat configuration.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between keepalive pings written by the outbound path.
    pub ping_interval: Duration,
    /// Grace period past one ping interval before a silent client is
    /// considered dead by the inbound path.
    pub ping_timeout: Duration,
}

impl HeartbeatConfig {
    /// Longest the inbound path waits for any frame.
    ///
    /// A live client answers every ping with a pong frame, so silence for a
    /// full interval plus the grace period means the peer is gone.
    pub fn read_deadline(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

impl From<&RealtimeConfig> for HeartbeatConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_seconds.max(1)),
            ping_timeout: Duration::from_secs(config.ping_timeout_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_deadline_spans_interval_and_grace() {
        let heartbeat = HeartbeatConfig::from(&RealtimeConfig::default());
        assert_eq!(heartbeat.ping_interval, Duration::from_secs(30));
        assert_eq!(heartbeat.read_deadline(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = RealtimeConfig {
            ping_interval_seconds: 0,
            ..RealtimeConfig::default()
        };
        assert_eq!(HeartbeatConfig::from(&config).ping_interval, Duration::from_secs(1));
    }
}
