//! Message types for the session actor.
//!
//! Caller requests arrive on the bounded mailbox as [`SessionMessage`]s
//! with a `oneshot` reply channel. Everything the actor learns
//! asynchronously (server pushes, request completions, peer reports,
//! redelivery timers) arrives on an unbounded internal channel as
//! [`SessionEvent`]s, so producers never block.

use super::flow::FlowId;
use super::session::SessionState;
use crate::errors::ClientError;
use crate::ice::{IceServer, IceServerInput};
use crate::peer::PeerEvent;
use crate::signaling::{ChannelError, ControlSignal, Credentials, WireEvent};
use crate::stream::{LocalStream, Origin, StreamInfo};
use common::types::{ClientId, StreamId};
use serde_json::Value;
use tokio::sync::oneshot;

/// Messages sent to the `SessionActor` by handles.
#[derive(Debug)]
pub enum SessionMessage {
    Connect {
        credentials: Credentials,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Always runs the disconnect cycle and emits `client-disconnected`.
    Disconnect { respond_to: oneshot::Sender<()> },

    Publish {
        stream: LocalStream,
        respond_to: oneshot::Sender<Result<StreamId, ClientError>>,
    },

    Unpublish {
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    Subscribe {
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    Unsubscribe {
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Application-defined message, answered by the server.
    Send {
        message: Value,
        respond_to: oneshot::Sender<Result<Value, ClientError>>,
    },

    Signal {
        stream_id: StreamId,
        signal: ControlSignal,
        respond_to: oneshot::Sender<Result<Value, ClientError>>,
    },

    /// Run a local stream's close hook (unpublish).
    CloseStream {
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    SetIceServers {
        servers: Vec<IceServerInput>,
        respond_to: oneshot::Sender<Vec<IceServer>>,
    },

    StreamsByAttribute {
        name: String,
        value: Value,
        respond_to: oneshot::Sender<Vec<StreamInfo>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<SessionStatus>,
    },

    ListStreams {
        origin: Origin,
        respond_to: oneshot::Sender<Vec<StreamInfo>>,
    },

    GetStream {
        origin: Origin,
        stream_id: StreamId,
        respond_to: oneshot::Sender<Option<StreamInfo>>,
    },

    /// Registry and flow consistency check (for tests).
    CheckInvariants {
        respond_to: oneshot::Sender<Vec<String>>,
    },
}

/// Asynchronous inputs to the session actor.
///
/// Completions carry the session epoch that issued the request; a
/// completion from an earlier epoch is discarded.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// A server push, still in wire form.
    Server(WireEvent),

    ConnectCompleted {
        epoch: u64,
        result: Result<Value, ChannelError>,
    },

    PublishAcked {
        epoch: u64,
        flow: FlowId,
        result: Result<Value, ChannelError>,
    },

    UnpublishCompleted {
        epoch: u64,
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
        result: Result<Value, ChannelError>,
    },

    SubscribeAcked {
        epoch: u64,
        flow: FlowId,
        result: Result<Value, ChannelError>,
    },

    UnsubscribeCompleted {
        epoch: u64,
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
        result: Result<Value, ChannelError>,
    },

    Peer(PeerEvent),

    /// A hold/ready notification retried from the session `epoch`.
    RedeliverControl {
        epoch: u64,
        event: ControlEvent,
        attempt: u32,
    },
}

/// Hold/ready notifications that wait for a subscription's controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEventKind {
    VideoHold,
    VideoReady,
    AudioHold,
    AudioReady,
}

impl ControlEventKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ControlEventKind::VideoHold => "video-hold",
            ControlEventKind::VideoReady => "video-ready",
            ControlEventKind::AudioHold => "audio-hold",
            ControlEventKind::AudioReady => "audio-ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub kind: ControlEventKind,
    pub stream_id: StreamId,
}

/// Session-level status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub client_id: Option<ClientId>,
    pub local_streams: usize,
    pub remote_streams: usize,
    /// Publish/subscribe flows between request and terminal outcome.
    pub flows_in_flight: usize,
    pub epoch: u64,
}
