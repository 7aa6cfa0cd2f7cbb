//! # wsrelay-core
//!
//! Shared vocabulary for the wsrelay crates.
//!
//! - **IDs**: [`SessionId`] newtype used for log correlation
//! - **Payloads**: [`Payload`], the opaque text/binary unit the relay forwards
//! - **Classification**: [`classify`], best-effort JSON kind extraction for logs
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod payload;

pub use ids::SessionId;
pub use payload::{MessageKind, Payload, classify};
