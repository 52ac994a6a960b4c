//! Peer connection abstraction.
//!
//! The negotiation engine (offer/answer, ICE gathering, media transport)
//! lives outside this crate. A [`PeerConnectionFactory`] creates one
//! [`PeerConnection`] per negotiating stream and hands it a
//! [`PeerEventSink`]; the engine reports outbound signaling messages,
//! connectivity changes and inbound media through that sink. Sink methods
//! never block, so they are safe to call from engine callbacks.

use crate::actors::messages::SessionEvent;
use crate::actors::FlowId;
use crate::ice::IceServer;
use crate::stream::{MediaHandle, Origin};
use common::types::StreamId;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("negotiation engine error: {0}")]
    Engine(String),

    #[error("peer connection closed")]
    Closed,
}

/// ICE connectivity state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Checking,
    Connected,
    Completed,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// Parse an engine state name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(state: &str) -> Option<Self> {
        match state {
            "checking" => Some(ConnectivityState::Checking),
            "connected" => Some(ConnectivityState::Connected),
            "completed" => Some(ConnectivityState::Completed),
            "failed" => Some(ConnectivityState::Failed),
            "closed" => Some(ConnectivityState::Closed),
            _ => None,
        }
    }

    /// `connected` and `completed` both mean media can flow.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(
            self,
            ConnectivityState::Connected | ConnectivityState::Completed
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Checking => "checking",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Completed => "completed",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction parameters for a peer connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerConnectionConfig {
    pub audio: bool,
    pub video: bool,
    /// Client-set ICE servers.
    pub ice_servers: Vec<IceServer>,
    /// Server-provided STUN url.
    pub stun_server_url: Option<String>,
    /// Server-provided TURN descriptor, passed through unchanged.
    pub turn_server: Option<Value>,
    pub max_audio_bandwidth: Option<u32>,
    pub max_video_bandwidth: Option<u32>,
}

/// One negotiation with the media server.
///
/// Owned by the session actor, which may be polled on any runtime thread.
pub trait PeerConnection: Send + Sync {
    fn attach_local_media(&mut self, media: MediaHandle) -> Result<(), PeerError>;

    /// Start negotiation. `receive_only` offers no outbound media.
    fn create_offer(&mut self, receive_only: bool) -> Result<(), PeerError>;

    /// Apply a remote answer or ICE candidate.
    fn process_signaling_message(&mut self, message: &Value) -> Result<(), PeerError>;

    /// Tear the connection down. Must be idempotent.
    fn close(&mut self);
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        config: PeerConnectionConfig,
        sink: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, PeerError>;
}

/// What a peer connection reported.
#[derive(Debug)]
pub enum PeerEventKind {
    /// Outbound negotiation message to relay to the server.
    Signaling(Value),
    Connectivity(ConnectivityState),
    /// Inbound media became available (subscriptions only).
    MediaArrived(MediaHandle),
}

/// A report from a peer connection, addressed to the flow that created it.
#[derive(Debug)]
pub struct PeerEvent {
    pub origin: Origin,
    pub stream_id: StreamId,
    pub flow: FlowId,
    pub kind: PeerEventKind,
}

/// Callback surface handed to each peer connection.
///
/// Reports are tagged with the flow that created the connection, so a
/// report from a connection that has since been replaced or closed is
/// recognised and dropped.
#[derive(Clone)]
pub struct PeerEventSink {
    origin: Origin,
    stream_id: StreamId,
    flow: FlowId,
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl fmt::Debug for PeerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEventSink")
            .field("origin", &self.origin)
            .field("stream_id", &self.stream_id)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl PeerEventSink {
    pub(crate) fn new(
        origin: Origin,
        stream_id: StreamId,
        flow: FlowId,
        sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            origin,
            stream_id,
            flow,
            sender,
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    fn report(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            origin: self.origin,
            stream_id: self.stream_id.clone(),
            flow: self.flow,
            kind,
        };
        if self.sender.send(SessionEvent::Peer(event)).is_err() {
            debug!(
                target: "sc.actor.session",
                stream_id = %self.stream_id,
                flow = %self.flow,
                "Session gone, peer report dropped"
            );
        }
    }

    /// Relay an outbound negotiation message.
    pub fn signaling(&self, message: Value) {
        self.report(PeerEventKind::Signaling(message));
    }

    pub fn connectivity_changed(&self, state: ConnectivityState) {
        self.report(PeerEventKind::Connectivity(state));
    }

    /// Report a connectivity change by engine state name. Unknown states
    /// are logged and ignored.
    pub fn connectivity_changed_raw(&self, state: &str) {
        match ConnectivityState::parse(state) {
            Some(state) => self.connectivity_changed(state),
            None => warn!(
                target: "sc.actor.session",
                stream_id = %self.stream_id,
                state,
                "Unknown ICE connection state"
            ),
        }
    }

    pub fn media_arrived(&self, media: MediaHandle) {
        self.report(PeerEventKind::MediaArrived(media));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sink() -> (PeerEventSink, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(Origin::Remote, StreamId::new("12"), FlowId(3), tx);
        (sink, rx)
    }

    #[test]
    fn test_connectivity_parse() {
        assert_eq!(
            ConnectivityState::parse("completed"),
            Some(ConnectivityState::Completed)
        );
        assert_eq!(ConnectivityState::parse("disconnected"), None);
        assert!(ConnectivityState::Connected.is_ready());
        assert!(ConnectivityState::Completed.is_ready());
        assert!(!ConnectivityState::Checking.is_ready());
        assert!(!ConnectivityState::Failed.is_ready());
    }

    #[test]
    fn test_sink_tags_reports_with_flow() {
        let (sink, mut rx) = sink();
        sink.signaling(json!({"type": "offer"}));

        match rx.try_recv().unwrap() {
            SessionEvent::Peer(event) => {
                assert_eq!(event.flow, FlowId(3));
                assert_eq!(event.origin, Origin::Remote);
                assert_eq!(event.stream_id, StreamId::new("12"));
                assert!(matches!(event.kind, PeerEventKind::Signaling(_)));
            }
            _ => unreachable!("sink only sends peer events"),
        }
    }

    #[test]
    fn test_unknown_raw_state_is_ignored() {
        let (sink, mut rx) = sink();
        sink.connectivity_changed_raw("new");
        assert!(rx.try_recv().is_err());

        sink.connectivity_changed_raw("failed");
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_report_after_session_gone_does_not_fail() {
        let (sink, rx) = sink();
        drop(rx);
        sink.connectivity_changed(ConnectivityState::Connected);
    }
}
