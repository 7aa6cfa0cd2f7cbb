//! Upstream side of a session: handshake headers and dialing.

pub mod connector;
pub mod headers;

pub use connector::{TungsteniteConnector, UpstreamConnector};
pub use headers::{BearerForwarding, ClientRequest, FixedIdentity, HeaderStrategy, strategy_from_settings};
