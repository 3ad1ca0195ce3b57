//! Server configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Seconds a call may ring before transitioning to `no_answer`.
    pub ring_timeout_secs: u64,
    /// Seconds a terminal call is retained before being pruned.
    pub call_retention_secs: u64,
    /// Seconds between retention sweeps.
    pub prune_interval_secs: u64,
}

impl ServerConfig {
    /// Ring timeout as a [`Duration`].
    #[must_use]
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    /// Retention window as a [`Duration`].
    #[must_use]
    pub fn call_retention(&self) -> Duration {
        Duration::from_secs(self.call_retention_secs)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ring_timeout_secs: 60,
            call_retention_secs: 3600,
            prune_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_ring_timeout_is_one_minute() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ring_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn default_retention_is_one_hour() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.call_retention(), Duration::from_secs(3600));
        assert_eq!(cfg.prune_interval(), Duration::from_secs(60));
    }

    #[test]
    fn serde_round_trip() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 3001,
            ring_timeout_secs: 30,
            call_retention_secs: 600,
            prune_interval_secs: 10,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.ring_timeout_secs, cfg.ring_timeout_secs);
        assert_eq!(back.call_retention_secs, cfg.call_retention_secs);
    }
}
