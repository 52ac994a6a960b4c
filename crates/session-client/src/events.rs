//! Public events and the event bus.
//!
//! Every externally observable state change is published as a
//! [`ClientEvent`] on a `tokio::sync::broadcast` channel. Subscribers that
//! fall more than `event_capacity` events behind observe
//! `RecvError::Lagged` and keep receiving from the newest retained event.

use crate::stream::StreamInfo;
use common::types::ClientId;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ClientConnected,
    ClientDisconnected,
    ClientJoined { user: Value, attributes: Value },
    ClientLeft { user: Value, attributes: Value },
    ClientId(ClientId),
    MessageReceived(Value),
    StreamAdded(StreamInfo),
    StreamRemoved(StreamInfo),
    StreamPublished(StreamInfo),
    StreamSubscribed(StreamInfo),
    VideoHold(StreamInfo),
    VideoReady(StreamInfo),
    AudioHold(StreamInfo),
    AudioReady(StreamInfo),
    VideoOn(StreamInfo),
    VideoOff(StreamInfo),
    AudioOn(StreamInfo),
    AudioOff(StreamInfo),
    /// Media connectivity to the server was lost.
    StreamFailed,
}

impl ClientEvent {
    /// Event name as exposed to applications.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::ClientConnected => "client-connected",
            ClientEvent::ClientDisconnected => "client-disconnected",
            ClientEvent::ClientJoined { .. } => "client-joined",
            ClientEvent::ClientLeft { .. } => "client-left",
            ClientEvent::ClientId(_) => "client-id",
            ClientEvent::MessageReceived(_) => "message-received",
            ClientEvent::StreamAdded(_) => "stream-added",
            ClientEvent::StreamRemoved(_) => "stream-removed",
            ClientEvent::StreamPublished(_) => "stream-published",
            ClientEvent::StreamSubscribed(_) => "stream-subscribed",
            ClientEvent::VideoHold(_) => "video-hold",
            ClientEvent::VideoReady(_) => "video-ready",
            ClientEvent::AudioHold(_) => "audio-hold",
            ClientEvent::AudioReady(_) => "audio-ready",
            ClientEvent::VideoOn(_) => "video-on",
            ClientEvent::VideoOff(_) => "video-off",
            ClientEvent::AudioOn(_) => "audio-on",
            ClientEvent::AudioOff(_) => "audio-off",
            ClientEvent::StreamFailed => "stream-failed",
        }
    }

    /// The stream this event is about, if any.
    #[must_use]
    pub fn stream(&self) -> Option<&StreamInfo> {
        match self {
            ClientEvent::StreamAdded(s)
            | ClientEvent::StreamRemoved(s)
            | ClientEvent::StreamPublished(s)
            | ClientEvent::StreamSubscribed(s)
            | ClientEvent::VideoHold(s)
            | ClientEvent::VideoReady(s)
            | ClientEvent::AudioHold(s)
            | ClientEvent::AudioReady(s)
            | ClientEvent::VideoOn(s)
            | ClientEvent::VideoOff(s)
            | ClientEvent::AudioOn(s)
            | ClientEvent::AudioOff(s) => Some(s),
            _ => None,
        }
    }
}

/// Broadcast bus for [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ClientEvent) {
        trace!(target: "sc.actor.session", event = event.name(), "Emitting event");
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
