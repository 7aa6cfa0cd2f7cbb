//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file only needs to name the values it changes.
//!
//! ```json
//! {
//!   "server": { "port": 9000 },
//!   "upstream": {
//!     "targetUrl": "wss://feed.example.com/ws",
//!     "auth": { "mode": "fixed", "userAgent": "Feed/2.0", "origin": "https://feed.example.com" }
//!   },
//!   "relay": { "maxPendingMessages": 256, "overflowPolicy": "dropNewest" }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Upstream endpoint and handshake headers.
    pub upstream: UpstreamSettings,
    /// Per-session relay limits.
    pub relay: RelayLimitSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let url = self.upstream.target_url.trim();
        if url.is_empty() {
            return Err(SettingsError::InvalidValue("upstream.targetUrl is empty".into()));
        }
        if url.len() != self.upstream.target_url.len() {
            return Err(SettingsError::InvalidValue(
                "upstream.targetUrl has leading or trailing whitespace".into(),
            ));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "upstream.targetUrl must use ws:// or wss://, got {url}"
            )));
        }
        if self.upstream.auth.mode == AuthMode::Bearer && self.upstream.auth.token_param.is_empty()
        {
            return Err(SettingsError::InvalidValue(
                "upstream.auth.tokenParam is required in bearer mode".into(),
            ));
        }
        if self.server.max_sessions == 0 {
            return Err(SettingsError::InvalidValue("server.maxSessions must be at least 1".into()));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Maximum concurrent relay sessions.
    pub max_sessions: usize,
    /// Origins allowed to open a relay session. Empty allows every origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            max_sessions: 1000,
            allowed_origins: Vec::new(),
        }
    }
}

/// Upstream endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// `ws://` or `wss://` URL every session dials.
    pub target_url: String,
    /// Handshake timeout in milliseconds. `0` disables the timeout.
    pub connect_timeout_ms: u64,
    /// Header strategy.
    pub auth: AuthSettings,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            target_url: "wss://wlserver.whiteless.hu".to_string(),
            connect_timeout_ms: 10_000,
            auth: AuthSettings::default(),
        }
    }
}

/// How upstream handshake headers are built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Forward the client's query-string token as `Authorization: Bearer`.
    #[default]
    Bearer,
    /// Send a fixed identity (`User-Agent`, `Origin`) with no client credential.
    Fixed,
}

impl AuthMode {
    /// Parse the env var spelling (`bearer` / `fixed`, case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_lowercase().as_str() {
            "bearer" => Some(Self::Bearer),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// Header strategy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Strategy selector.
    pub mode: AuthMode,
    /// Query parameter carrying the client credential (bearer mode).
    pub token_param: String,
    /// `User-Agent` sent upstream.
    pub user_agent: String,
    /// `Origin` override sent upstream (fixed mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::Bearer,
            token_param: "token".to_string(),
            user_agent: "WhiteWeb/1.0.0".to_string(),
            origin: None,
        }
    }
}

/// What to do when the pending queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Drop the message that did not fit and keep the session.
    DropNewest,
    /// Close the client with 4003 and abandon the upstream dial.
    #[default]
    CloseSession,
}

/// Per-session relay limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayLimitSettings {
    /// Messages buffered while upstream connects. `0` means unbounded.
    pub max_pending_messages: usize,
    /// Behavior once `max_pending_messages` is reached.
    pub overflow_policy: OverflowPolicy,
    /// How long a closing session waits for close echoes, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for RelayLimitSettings {
    fn default() -> Self {
        Self {
            max_pending_messages: 1024,
            overflow_policy: OverflowPolicy::CloseSession,
            close_timeout_ms: 5_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
