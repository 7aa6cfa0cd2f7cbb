//! Upstream dialing.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::relay::Leg;

/// Opens the upstream leg of a session.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Dial upstream, attaching `headers` to the handshake.
    async fn connect(&self, headers: HeaderMap) -> Result<Leg>;
}

/// Dials a fixed `ws://` or `wss://` target with `tokio-tungstenite`.
#[derive(Clone, Debug)]
pub struct TungsteniteConnector {
    url: String,
    connect_timeout: Option<Duration>,
}

impl TungsteniteConnector {
    /// Connector for `url`. A `None` timeout waits indefinitely.
    pub fn new(url: impl Into<String>, connect_timeout: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    async fn dial(&self, headers: HeaderMap) -> Result<Leg> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::InvalidTarget(e.to_string()))?;
        request.headers_mut().extend(headers);

        let (ws, response) = connect_async(request).await?;
        debug!(url = %self.url, status = %response.status(), "upstream handshake complete");
        Ok(Leg::from_tungstenite(ws))
    }
}

#[async_trait]
impl UpstreamConnector for TungsteniteConnector {
    async fn connect(&self, headers: HeaderMap) -> Result<Leg> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.dial(headers))
                .await
                .map_err(|_| RelayError::UpstreamTimeout(limit))?,
            None => self.dial(headers).await,
        }
    }
}
