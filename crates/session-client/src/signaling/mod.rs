//! Signaling channel abstraction.
//!
//! The signaling channel is the durable connection to the session server.
//! It carries two kinds of traffic:
//!
//! - **Requests**: a [`SignalingRequest`] answered by exactly one response
//!   (success payload or failure reason), or a transport error.
//! - **Push events**: named server events, delivered in order on the
//!   receiver returned by [`SignalingChannel::take_events`].
//!
//! The channel object outlives individual connections. `close()` tears
//! down the open connection only, and a later `open()` re-establishes it
//! on the same object, so the push-event receiver is taken exactly once.

pub mod protocol;

pub use protocol::{
    ConnectResponse, ControlAction, ControlSignal, ProtocolError, PublishResponse, PublishSource,
    ServerEvent, SignalingRequest, WireEvent,
};

use async_trait::async_trait;
use common::secret::SecretString;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure of a single channel operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The server answered with an error response.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The transport's own response timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// No connection is open.
    #[error("channel not open")]
    NotOpen,

    /// The connection closed before a response arrived.
    #[error("channel closed: {0}")]
    Closed(String),

    /// Any other transport-level failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Session credentials presented on connect.
///
/// The token is only exposed when the `token` request is encoded.
#[derive(Debug)]
pub struct Credentials {
    /// Session server host (`host:port`).
    pub host: String,
    /// Whether the transport must use TLS.
    pub secure: bool,
    /// Opaque session token issued by the application backend.
    pub token: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(host: impl Into<String>, secure: bool, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secure,
            token: SecretString::from(token.into()),
        }
    }
}

/// Durable connection to the session server.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Open (or re-open) the transport connection.
    async fn open(&self, host: &str, secure: bool) -> Result<(), ChannelError>;

    /// Send a request and wait for its response payload.
    async fn request(&self, request: SignalingRequest) -> Result<Value, ChannelError>;

    /// Send a message without waiting for a response.
    ///
    /// Notifications issued from one task are delivered in issue order.
    async fn notify(&self, request: SignalingRequest) -> Result<(), ChannelError>;

    /// Take the push-event receiver. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<WireEvent>>;

    /// Close the open connection. Closing an already closed channel is not
    /// an error.
    async fn close(&self) -> Result<(), ChannelError>;
}
