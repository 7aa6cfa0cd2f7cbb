//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsrelay_settings::{AuthSettings, OverflowPolicy, RelaySettings};

use crate::relay::RelayLimits;

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent relay sessions.
    pub max_sessions: usize,
    /// Origins allowed to upgrade. Empty allows all.
    pub allowed_origins: Vec<String>,
    /// Upstream `ws://` / `wss://` URL.
    pub target_url: String,
    /// Upstream handshake timeout in milliseconds, `0` to disable.
    pub connect_timeout_ms: u64,
    /// Upstream header strategy.
    pub auth: AuthSettings,
    /// Client messages buffered while upstream connects, `0` for unbounded.
    pub max_pending_messages: usize,
    /// What happens when the buffer is full.
    pub overflow_policy: OverflowPolicy,
    /// Close handshake timeout in milliseconds.
    pub close_timeout_ms: u64,
}

impl ServerConfig {
    /// Flatten loaded settings into server configuration.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_sessions: settings.server.max_sessions,
            allowed_origins: settings.server.allowed_origins.clone(),
            target_url: settings.upstream.target_url.clone(),
            connect_timeout_ms: settings.upstream.connect_timeout_ms,
            auth: settings.upstream.auth.clone(),
            max_pending_messages: settings.relay.max_pending_messages,
            overflow_policy: settings.relay.overflow_policy,
            close_timeout_ms: settings.relay.close_timeout_ms,
        }
    }

    /// Upstream handshake timeout, `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// Per-session limits.
    pub fn relay_limits(&self) -> RelayLimits {
        RelayLimits {
            max_pending: self.max_pending_messages,
            overflow: self.overflow_policy,
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut config = Self::from_settings(&RelaySettings::default());
        config.host = "127.0.0.1".into();
        config.port = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_any_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        assert_eq!(cfg.max_sessions, 1000);
    }

    #[test]
    fn from_settings_copies_values() {
        let mut settings = RelaySettings::default();
        settings.server.port = 9100;
        settings.server.allowed_origins = vec!["https://a.example".into()];
        settings.upstream.target_url = "ws://127.0.0.1:9".into();
        settings.relay.max_pending_messages = 2;
        settings.relay.overflow_policy = OverflowPolicy::DropNewest;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9100");
        assert_eq!(cfg.allowed_origins, vec!["https://a.example".to_string()]);
        assert_eq!(cfg.target_url, "ws://127.0.0.1:9");

        let limits = cfg.relay_limits();
        assert_eq!(limits.max_pending, 2);
        assert_eq!(limits.overflow, OverflowPolicy::DropNewest);
        assert_eq!(limits.close_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_connect_timeout_disables_it() {
        let mut cfg = ServerConfig::default();
        assert_eq!(cfg.connect_timeout(), Some(Duration::from_secs(10)));
        cfg.connect_timeout_ms = 0;
        assert_eq!(cfg.connect_timeout(), None);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.target_url, cfg.target_url);
        assert_eq!(back.overflow_policy, cfg.overflow_policy);
        assert_eq!(back.auth.mode, cfg.auth.mode);
    }
}
