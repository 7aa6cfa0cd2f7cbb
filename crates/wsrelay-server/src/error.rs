//! Relay error types.

use std::time::Duration;

use thiserror::Error;

use crate::relay::close::CloseInfo;

/// Errors raised while setting up or running a relay session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The request did not carry the credential the header strategy needs.
    #[error("missing credential parameter `{param}`")]
    MissingCredential {
        /// Query parameter that was expected.
        param: String,
    },
    /// A value could not be encoded as an HTTP header.
    #[error("invalid header value for {name}")]
    InvalidHeader {
        /// Header name.
        name: String,
    },
    /// The configured upstream URL could not be turned into a request.
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),
    /// Dialing or talking to the upstream failed.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The upstream handshake did not finish in time.
    #[error("upstream handshake timed out after {0:?}")]
    UpstreamTimeout(Duration),
    /// Transport failure on the client leg.
    #[error("client error: {0}")]
    Client(String),
    /// Listener I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Close frame the client sees when this error ends its session.
    pub fn close_info(&self) -> CloseInfo {
        match self {
            Self::MissingCredential { .. } => CloseInfo::missing_credential(),
            Self::InvalidHeader { .. } => CloseInfo::invalid_credential(),
            Self::InvalidTarget(_)
            | Self::Upstream(_)
            | Self::UpstreamTimeout(_)
            | Self::Client(_)
            | Self::Io(_) => CloseInfo::target_error(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
