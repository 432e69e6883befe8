//! Core configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the peer manager and transfer engine.
///
/// Defaults match the protocol constants; hosts usually only set
/// `listen_port` and `data_root`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on; 0 requests an ephemeral port. If a specific port
    /// cannot be bound, an ephemeral one is chosen and reported instead.
    pub listen_port: u16,

    /// Data root; received files land in `<data_root>/inbox/`.
    pub data_root: PathBuf,

    /// TCP connect deadline.
    pub dial_timeout: Duration,

    /// Handshake completion deadline, independent of the dial deadline.
    pub handshake_timeout: Duration,

    /// Chunks requested per window (in-flight bound per transfer).
    pub max_in_flight: i64,

    /// Consecutive failures for the same chunk before a transfer is
    /// aborted as corrupted.
    pub chunk_retry_budget: u32,

    /// Dial discovered-but-unknown peers automatically after a short
    /// random delay.
    pub auto_connect: bool,

    /// Keepalive ping interval; `None` disables keepalives.
    pub keepalive_interval: Option<Duration>,

    /// Capacity of the bounded event queue delivered to the host.
    pub event_capacity: usize,
}

impl Config {
    /// Configuration with protocol defaults rooted at `data_root`.
    #[must_use]
    pub fn new(data_root: PathBuf) -> Self {
        Self {
            listen_port: 0,
            data_root,
            dial_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(30),
            max_in_flight: 8,
            chunk_retry_budget: 5,
            auto_connect: true,
            keepalive_interval: Some(Duration::from_secs(30)),
            event_capacity: 64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("lantern"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.dial_timeout, Duration::from_secs(15));
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.chunk_retry_budget, 5);
        assert_eq!(config.listen_port, 0);
        assert!(config.auto_connect);
    }
}
