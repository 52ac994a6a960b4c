//! Session client error types.
//!
//! Every operation on [`crate::SessionClientHandle`] reports failure through
//! a [`ClientError`]. Errors never cross the event-dispatch boundary: events
//! describe what happened, errors describe why a specific call failed.

use crate::actors::SessionState;
use crate::signaling::ChannelError;
use thiserror::Error;

/// Session client error type.
///
/// `code()` yields a stable string code for log correlation:
/// - `InvalidStream`, `NoMedia`, `StreamNotFound`: `invalid_argument`
/// - `NotConnected`, `AlreadyConnecting`, `ControlNotReady`: `invalid_state`
/// - `SignalingRejected`, `SubscribeRejected`: `rejected`
/// - `NegotiationFailed`: `negotiation_failed`
/// - `TransportError`, `Protocol`: `transport`
/// - `Aborted`: `aborted`
/// - `Internal`: `internal`
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed or missing argument (no capabilities, no media source,
    /// wrong origin, already published).
    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    /// Remote stream declares neither audio, video nor screen.
    #[error("Stream does not have video/audio/screen")]
    NoMedia,

    /// Operation requires the Connected state.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called while not Disconnected. Carries the state found.
    #[error("Already connecting or connected: {0}")]
    AlreadyConnecting(SessionState),

    /// The server answered a specific request with an error.
    #[error("Signaling request rejected: {0}")]
    SignalingRejected(String),

    /// The server refused (or timed out) a subscription request.
    #[error("Subscription rejected: {0}")]
    SubscribeRejected(String),

    /// The connectivity handshake reached the failed state.
    #[error("Peer connection failed")]
    NegotiationFailed,

    /// Channel-level failure or close before any response arrived.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// No stream with this id in the registry of the expected origin.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Control signals are only wired once the stream's flow is ready.
    #[error("Stream controls not ready: {0}")]
    ControlNotReady(String),

    /// The flow or request was torn down (disconnect, stream removal)
    /// before it resolved.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// A server response did not decode into the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Actor mailbox failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::InvalidStream(_) | ClientError::NoMedia | ClientError::StreamNotFound(_) => {
                "invalid_argument"
            }
            ClientError::NotConnected
            | ClientError::AlreadyConnecting(_)
            | ClientError::ControlNotReady(_) => "invalid_state",
            ClientError::SignalingRejected(_) | ClientError::SubscribeRejected(_) => "rejected",
            ClientError::NegotiationFailed => "negotiation_failed",
            ClientError::TransportError(_) | ClientError::Protocol(_) => "transport",
            ClientError::Aborted(_) => "aborted",
            ClientError::Internal(_) => "internal",
        }
    }

    /// Map a channel failure of a generic request.
    ///
    /// Server rejections and timeouts become `SignalingRejected`; transport
    /// failures stay `TransportError`.
    #[must_use]
    pub fn from_request(err: ChannelError) -> Self {
        match err {
            ChannelError::Rejected(reason) => ClientError::SignalingRejected(reason),
            ChannelError::Timeout => ClientError::SignalingRejected("timeout".to_string()),
            ChannelError::NotOpen => ClientError::TransportError("socket error".to_string()),
            ChannelError::Closed(reason) | ChannelError::Transport(reason) => {
                ClientError::TransportError(reason)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ClientError::InvalidStream("no capabilities".to_string()).code(),
            "invalid_argument"
        );
        assert_eq!(ClientError::NoMedia.code(), "invalid_argument");
        assert_eq!(
            ClientError::StreamNotFound("7".to_string()).code(),
            "invalid_argument"
        );

        assert_eq!(ClientError::NotConnected.code(), "invalid_state");
        assert_eq!(
            ClientError::AlreadyConnecting(SessionState::Connected).code(),
            "invalid_state"
        );
        assert_eq!(
            ClientError::ControlNotReady("7".to_string()).code(),
            "invalid_state"
        );

        assert_eq!(
            ClientError::SignalingRejected("unauthorized".to_string()).code(),
            "rejected"
        );
        assert_eq!(
            ClientError::SubscribeRejected("timeout".to_string()).code(),
            "rejected"
        );

        assert_eq!(ClientError::NegotiationFailed.code(), "negotiation_failed");
        assert_eq!(
            ClientError::TransportError("socket closed".to_string()).code(),
            "transport"
        );
        assert_eq!(ClientError::Protocol("missing id".to_string()).code(), "transport");
        assert_eq!(ClientError::Aborted("disconnected".to_string()).code(), "aborted");
        assert_eq!(ClientError::Internal("mailbox".to_string()).code(), "internal");
    }

    #[test]
    fn test_request_failures_merge_rejection_and_timeout() {
        let rejected = ClientError::from_request(ChannelError::Rejected("error".to_string()));
        assert!(matches!(rejected, ClientError::SignalingRejected(ref r) if r == "error"));

        let timeout = ClientError::from_request(ChannelError::Timeout);
        assert!(matches!(timeout, ClientError::SignalingRejected(ref r) if r == "timeout"));

        let not_open = ClientError::from_request(ChannelError::NotOpen);
        assert!(matches!(not_open, ClientError::TransportError(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ClientError::AlreadyConnecting(SessionState::Connecting)),
            "Already connecting or connected: connecting"
        );
        assert_eq!(
            format!("{}", ClientError::NegotiationFailed),
            "Peer connection failed"
        );
        assert_eq!(
            format!("{}", ClientError::InvalidStream("stream is not local".to_string())),
            "Invalid stream: stream is not local"
        );
    }
}
