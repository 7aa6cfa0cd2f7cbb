//! Close codes and close-frame conversions for both legs.

use axum::extract::ws::CloseFrame as ClientCloseFrame;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Client did not present the required credential.
pub const MISSING_CREDENTIAL: u16 = 4001;
/// The upstream connection failed or errored.
pub const TARGET_ERROR: u16 = 4002;
/// Too many client messages arrived before upstream was ready.
pub const QUEUE_OVERFLOW: u16 = 4003;
/// Standard "going away" code used on shutdown.
pub const GOING_AWAY: u16 = 1001;

/// Status code plus reason carried by a close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close status code.
    pub code: u16,
    /// Free-text reason.
    pub reason: String,
}

impl CloseInfo {
    /// Build from parts.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// 4001 sent when the credential parameter is absent.
    pub fn missing_credential() -> Self {
        Self::new(MISSING_CREDENTIAL, "Missing token parameter")
    }

    /// 4001 sent when the credential cannot be used as a header value.
    pub fn invalid_credential() -> Self {
        Self::new(MISSING_CREDENTIAL, "Invalid token parameter")
    }

    /// 4002 sent when the upstream leg errors.
    pub fn target_error() -> Self {
        Self::new(TARGET_ERROR, "Target server error")
    }

    /// 4003 sent when the pending queue overflows.
    pub fn queue_overflow() -> Self {
        Self::new(QUEUE_OVERFLOW, "Pending queue overflow")
    }

    /// 1001 sent to both legs on shutdown.
    pub fn shutting_down() -> Self {
        Self::new(GOING_AWAY, "Server shutting down")
    }
}

impl From<ClientCloseFrame> for CloseInfo {
    fn from(frame: ClientCloseFrame) -> Self {
        Self::new(frame.code, frame.reason.as_str())
    }
}

impl From<CloseInfo> for ClientCloseFrame {
    fn from(info: CloseInfo) -> Self {
        Self {
            code: info.code,
            reason: info.reason.into(),
        }
    }
}

impl From<UpstreamCloseFrame> for CloseInfo {
    fn from(frame: UpstreamCloseFrame) -> Self {
        Self::new(u16::from(frame.code), frame.reason.as_str())
    }
}

impl From<CloseInfo> for UpstreamCloseFrame {
    fn from(info: CloseInfo) -> Self {
        Self {
            code: CloseCode::from(info.code),
            reason: info.reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_codes() {
        assert_eq!(CloseInfo::missing_credential().code, 4001);
        assert_eq!(CloseInfo::target_error().code, 4002);
        assert_eq!(CloseInfo::queue_overflow().code, 4003);
        assert_eq!(CloseInfo::shutting_down().code, 1001);
    }

    #[test]
    fn upstream_frame_keeps_code_and_reason() {
        let frame = UpstreamCloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        };
        let info = CloseInfo::from(frame);
        assert_eq!(info, CloseInfo::new(1001, "bye"));

        let back = UpstreamCloseFrame::from(info);
        assert_eq!(back.code, CloseCode::Away);
        assert_eq!(back.reason.as_str(), "bye");
    }

    #[test]
    fn application_codes_survive_upstream_conversion() {
        let back = UpstreamCloseFrame::from(CloseInfo::new(4100, "custom"));
        assert_eq!(u16::from(back.code), 4100);
    }

    #[test]
    fn client_frame_keeps_code_and_reason() {
        let frame = ClientCloseFrame {
            code: 1000,
            reason: "normal".into(),
        };
        let info = CloseInfo::from(frame);
        assert_eq!(info, CloseInfo::new(1000, "normal"));

        let back = ClientCloseFrame::from(info);
        assert_eq!(back.code, 1000);
        assert_eq!(back.reason.as_str(), "normal");
    }
}
