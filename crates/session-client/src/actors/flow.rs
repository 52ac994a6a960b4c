//! Per-stream handshake flows.
//!
//! A flow drives one publish or subscribe attempt from request to a
//! terminal outcome. Outcomes are guarded by [`ResolveOnce`]: whichever of
//! ready, failed or aborted claims the flag first wins, and every later
//! attempt is a no-op.

use crate::errors::ClientError;
use crate::stream::{LocalStream, MediaHandle};
use common::types::StreamId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;

/// Terminal-state flag flipped at most once.
#[derive(Debug, Default)]
pub struct ResolveOnce(AtomicBool);

impl ResolveOnce {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Claim the terminal transition. Returns `true` for the first caller
    /// only.
    pub fn try_resolve(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Identifies one handshake attempt. Never reused within a session client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(pub u64);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Publish,
    Subscribe,
}

impl FlowKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Publish => "publish",
            FlowKind::Subscribe => "subscribe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Negotiating,
    Ready,
    Failed,
}

/// Where a flow reports its outcome.
#[derive(Debug)]
pub(crate) enum FlowResponder {
    Publish(oneshot::Sender<Result<StreamId, ClientError>>),
    Subscribe(oneshot::Sender<Result<(), ClientError>>),
}

/// The media a publish was accepted with.
#[derive(Debug)]
pub(crate) enum PublishMedia {
    Url(String),
    Live(MediaHandle),
}

/// A publish whose `publish` request is in flight.
#[derive(Debug)]
pub(crate) struct PendingPublish {
    pub flow: FlowId,
    pub stream: LocalStream,
    pub media: PublishMedia,
    pub respond_to: oneshot::Sender<Result<StreamId, ClientError>>,
}

/// A subscription whose `subscribe` request is in flight.
#[derive(Debug)]
pub(crate) struct PendingSubscribe {
    pub flow: FlowId,
    pub stream_id: StreamId,
    pub respond_to: oneshot::Sender<Result<(), ClientError>>,
}

/// A flow that has been acknowledged and owns a peer connection.
#[derive(Debug)]
pub(crate) struct Flow {
    pub id: FlowId,
    pub kind: FlowKind,
    pub stream_id: StreamId,
    pub stage: FlowStage,
    pub resolve: ResolveOnce,
    /// Subscriptions: inbound media delivered.
    pub media_arrived: bool,
    /// Connectivity reached connected/completed.
    pub channel_ready: bool,
    responder: Option<FlowResponder>,
}

impl Flow {
    pub fn new(id: FlowId, kind: FlowKind, stream_id: StreamId, responder: FlowResponder) -> Self {
        Self {
            id,
            kind,
            stream_id,
            stage: FlowStage::Negotiating,
            resolve: ResolveOnce::new(),
            media_arrived: false,
            channel_ready: false,
            responder: Some(responder),
        }
    }

    /// Report success to the caller. Callers must have claimed `resolve`.
    pub fn succeed(&mut self) {
        self.stage = FlowStage::Ready;
        match self.responder.take() {
            Some(FlowResponder::Publish(tx)) => {
                let _ = tx.send(Ok(self.stream_id.clone()));
            }
            Some(FlowResponder::Subscribe(tx)) => {
                let _ = tx.send(Ok(()));
            }
            None => {}
        }
    }

    /// Report failure to the caller. Callers must have claimed `resolve`.
    pub fn fail(&mut self, error: ClientError) {
        self.stage = FlowStage::Failed;
        if let Some(responder) = self.responder.take() {
            responder.fail(error);
        }
    }
}

impl FlowResponder {
    pub fn fail(self, error: ClientError) {
        match self {
            FlowResponder::Publish(tx) => {
                let _ = tx.send(Err(error));
            }
            FlowResponder::Subscribe(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}
