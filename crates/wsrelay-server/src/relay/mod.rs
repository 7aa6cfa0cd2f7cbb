//! Relay sessions: one client leg bridged to one upstream leg.
//!
//! [`state`] holds the pure transition logic, [`driver`] runs it against real
//! (or in-memory) legs in a single task.

pub mod close;
pub mod driver;
pub mod frame;
pub mod queue;
pub mod state;

use std::time::Duration;

use wsrelay_settings::OverflowPolicy;

pub use close::CloseInfo;
pub use driver::{SessionReport, SessionSetup, run_session};
pub use frame::{Frame, Leg, Outbound};
pub use queue::PendingQueue;
pub use state::{Action, Event, LegState, Phase, QueueLimits, RelaySession};

/// Per-session limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayLimits {
    /// Client messages buffered while upstream connects, `0` for unbounded.
    pub max_pending: usize,
    /// Behavior once the buffer is full.
    pub overflow: OverflowPolicy,
    /// How long a closing session waits for both legs to finish.
    pub close_timeout: Duration,
}

impl RelayLimits {
    /// Queue part of the limits.
    pub fn queue(&self) -> QueueLimits {
        QueueLimits {
            max_pending: self.max_pending,
            overflow: self.overflow,
        }
    }
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_pending: 1024,
            overflow: OverflowPolicy::CloseSession,
            close_timeout: Duration::from_secs(5),
        }
    }
}
