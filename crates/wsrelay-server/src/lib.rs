//! # wsrelay-server
//!
//! Axum HTTP + `WebSocket` relay server.
//!
//! - Relay sessions: one client leg paired with one server-originated upstream
//!   leg, with buffering while upstream connects and symmetric close propagation
//! - Upstream header strategies (bearer forwarding, fixed identity) and the
//!   `tokio-tungstenite` connector
//! - HTTP endpoints: health check, Prometheus metrics, CORS banner
//! - Origin policy and session cap checked before upgrade
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod origin;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod upstream;

pub use error::{RelayError, Result};
