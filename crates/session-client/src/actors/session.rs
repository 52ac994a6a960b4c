//! `SessionActor` - owner of one client session.
//!
//! The actor exclusively owns the session state, the stream registry and
//! every in-flight publish/subscribe flow. It never blocks on the network:
//! signaling requests run in spawned tasks that post their completion back
//! on the internal channel, tagged with the session epoch that issued them.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect--> Connecting --server ack--> Connected
//! Connecting|Connected --disconnect / channel error / channel closed--> Disconnected
//! ```
//!
//! # Disconnect cycle
//!
//! 1. Every remote stream is detached and announced with `stream-removed`
//! 2. Every local stream's peer connection is closed, without events
//! 3. Pending flows and a pending connect resolve with `Aborted`
//! 4. State becomes Disconnected and the epoch advances
//! 5. The channel connection is closed (already closed is fine)
//! 6. `client-disconnected` is emitted
//!
//! The channel object itself survives, so a later `connect()` re-opens the
//! same channel and the push-event receiver is taken only once.
//!
//! Losing the channel while Connecting runs steps 1 to 5 but answers the
//! pending connect with `TransportError` and skips step 6.

use super::flow::{Flow, FlowId, FlowStage, PendingPublish, PendingSubscribe};
use super::messages::{
    ControlEvent, ControlEventKind, SessionEvent, SessionMessage, SessionStatus,
};
use super::metrics::SessionMetrics;
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::events::{ClientEvent, EventBus};
use crate::ice::{normalize_ice_servers, IceServer, IceServerInput};
use crate::peer::{PeerConnectionFactory, PeerEvent, PeerEventKind};
use crate::registry::StreamRegistry;
use crate::signaling::{
    ChannelError, ConnectResponse, ControlSignal, Credentials, ServerEvent, SignalingChannel,
    SignalingRequest, WireEvent,
};
use crate::stream::{Attributes, Capabilities, LocalStream, Origin, Stream, StreamInfo};
use common::types::{ClientId, StreamId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a `SessionActor`.
///
/// This is the public interface of the session client. Handles are cheap to
/// clone; all clones talk to the same actor.
#[derive(Clone)]
pub struct SessionClientHandle {
    sender: mpsc::Sender<SessionMessage>,
    events: EventBus,
    metrics: Arc<SessionMetrics>,
    cancel_token: CancellationToken,
}

impl SessionClientHandle {
    /// Spawn a session actor and return a handle to it.
    ///
    /// The channel is kept for the lifetime of the actor and reused across
    /// reconnects. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        config: ClientConfig,
        channel: Arc<dyn SignalingChannel>,
        peers: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity);
        let cancel_token = CancellationToken::new();
        let events = EventBus::new(config.event_capacity);
        let metrics = SessionMetrics::new(config.instance_id.clone());

        let actor = SessionActor::new(
            config,
            receiver,
            cancel_token.clone(),
            events.clone(),
            Arc::clone(&metrics),
            channel,
            peers,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            events,
            metrics,
            cancel_token,
        }
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.metrics.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message(tx)).await {
            self.metrics.mailbox.record_dequeue();
            return Err(ClientError::Internal(format!("channel send failed: {e}")));
        }

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// Connect to the session server.
    ///
    /// Fails with `AlreadyConnecting` unless Disconnected. Emits
    /// `client-connected` on success.
    pub async fn connect(&self, credentials: Credentials) -> Result<(), ClientError> {
        self.call(|respond_to| SessionMessage::Connect {
            credentials,
            respond_to,
        })
        .await?
    }

    /// Tear the session down. Always emits `client-disconnected`.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.call(|respond_to| SessionMessage::Disconnect { respond_to })
            .await
    }

    /// Publish a local stream. Resolves with the server-assigned id once the
    /// stream is ready (URL streams: once the server accepts it).
    pub async fn publish(&self, stream: LocalStream) -> Result<StreamId, ClientError> {
        self.call(|respond_to| SessionMessage::Publish { stream, respond_to })
            .await?
    }

    pub async fn unpublish(&self, stream_id: &StreamId) -> Result<(), ClientError> {
        self.call(|respond_to| SessionMessage::Unpublish {
            stream_id: stream_id.clone(),
            respond_to,
        })
        .await?
    }

    /// Subscribe to a remote stream. Resolves once media has arrived and
    /// connectivity is established.
    pub async fn subscribe(&self, stream_id: &StreamId) -> Result<(), ClientError> {
        self.call(|respond_to| SessionMessage::Subscribe {
            stream_id: stream_id.clone(),
            respond_to,
        })
        .await?
    }

    pub async fn unsubscribe(&self, stream_id: &StreamId) -> Result<(), ClientError> {
        self.call(|respond_to| SessionMessage::Unsubscribe {
            stream_id: stream_id.clone(),
            respond_to,
        })
        .await?
    }

    /// Send an application-defined message. Resolves with the server's
    /// acknowledgment.
    pub async fn send(&self, message: Value) -> Result<Value, ClientError> {
        self.call(|respond_to| SessionMessage::Send {
            message,
            respond_to,
        })
        .await?
    }

    /// Send a play/pause control for a ready stream.
    pub async fn signal(
        &self,
        stream_id: &StreamId,
        signal: ControlSignal,
    ) -> Result<Value, ClientError> {
        self.call(|respond_to| SessionMessage::Signal {
            stream_id: stream_id.clone(),
            signal,
            respond_to,
        })
        .await?
    }

    /// Close a published stream through its close hook (unpublishes it).
    pub async fn close_stream(&self, stream_id: &StreamId) -> Result<(), ClientError> {
        self.call(|respond_to| SessionMessage::CloseStream {
            stream_id: stream_id.clone(),
            respond_to,
        })
        .await?
    }

    /// Replace the client-set ICE servers. Returns the normalised list.
    pub async fn set_ice_servers(
        &self,
        servers: Vec<IceServerInput>,
    ) -> Result<Vec<IceServer>, ClientError> {
        self.call(|respond_to| SessionMessage::SetIceServers {
            servers,
            respond_to,
        })
        .await
    }

    /// Remote streams whose attribute `name` equals `value`.
    pub async fn streams_by_attribute(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<Vec<StreamInfo>, ClientError> {
        let name = name.into();
        self.call(|respond_to| SessionMessage::StreamsByAttribute {
            name,
            value,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<SessionStatus, ClientError> {
        self.call(|respond_to| SessionMessage::GetStatus { respond_to })
            .await
    }

    pub async fn state(&self) -> Result<SessionState, ClientError> {
        Ok(self.status().await?.state)
    }

    pub async fn client_id(&self) -> Result<Option<ClientId>, ClientError> {
        Ok(self.status().await?.client_id)
    }

    pub async fn local_streams(&self) -> Result<Vec<StreamInfo>, ClientError> {
        self.call(|respond_to| SessionMessage::ListStreams {
            origin: Origin::Local,
            respond_to,
        })
        .await
    }

    pub async fn remote_streams(&self) -> Result<Vec<StreamInfo>, ClientError> {
        self.call(|respond_to| SessionMessage::ListStreams {
            origin: Origin::Remote,
            respond_to,
        })
        .await
    }

    pub async fn stream(
        &self,
        origin: Origin,
        stream_id: &StreamId,
    ) -> Result<Option<StreamInfo>, ClientError> {
        self.call(|respond_to| SessionMessage::GetStream {
            origin,
            stream_id: stream_id.clone(),
            respond_to,
        })
        .await
    }

    /// Every violated registry or flow invariant. Empty when consistent.
    pub async fn check_invariants(&self) -> Result<Vec<String>, ClientError> {
        self.call(|respond_to| SessionMessage::CheckInvariants { respond_to })
            .await
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Session-level attributes. Server-provided fields reset on every
/// disconnect; client-set ICE servers persist.
#[derive(Debug)]
pub(super) struct Session {
    pub state: SessionState,
    pub client_id: Option<ClientId>,
    pub ice_servers: Vec<IceServer>,
    pub stun_server_url: Option<String>,
    pub turn_server: Option<Value>,
    pub default_video_bandwidth: Option<u32>,
    pub max_video_bandwidth: Option<u32>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            client_id: None,
            ice_servers: Vec::new(),
            stun_server_url: None,
            turn_server: None,
            default_video_bandwidth: None,
            max_video_bandwidth: None,
        }
    }

    fn apply(&mut self, response: ConnectResponse) {
        self.stun_server_url = response.stun_server_url;
        self.turn_server = response.turn_server;
        self.default_video_bandwidth = response.default_video_bandwidth;
        self.max_video_bandwidth = response.max_video_bandwidth;
    }

    fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        self.client_id = None;
        self.stun_server_url = None;
        self.turn_server = None;
        self.default_video_bandwidth = None;
        self.max_video_bandwidth = None;
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    pub(super) config: ClientConfig,
    receiver: mpsc::Receiver<SessionMessage>,
    pub(super) internal_tx: mpsc::UnboundedSender<SessionEvent>,
    internal_rx: mpsc::UnboundedReceiver<SessionEvent>,
    notifier_tx: mpsc::UnboundedSender<SignalingRequest>,
    notifier_rx: Option<mpsc::UnboundedReceiver<SignalingRequest>>,
    pub(super) cancel_token: CancellationToken,
    pub(super) events: EventBus,
    pub(super) metrics: Arc<SessionMetrics>,
    pub(super) channel: Arc<dyn SignalingChannel>,
    pub(super) peers: Arc<dyn PeerConnectionFactory>,
    pub(super) session: Session,
    pub(super) registry: StreamRegistry,
    pub(super) pending_publishes: HashMap<FlowId, PendingPublish>,
    pub(super) pending_subscribes: HashMap<FlowId, PendingSubscribe>,
    /// Acknowledged flows, kept until their negotiation is detached.
    pub(super) flows: HashMap<FlowId, Flow>,
    pending_connect: Option<oneshot::Sender<Result<(), ClientError>>>,
    server_events_wired: bool,
    /// Advances on every connect and teardown.
    pub(super) epoch: u64,
    next_flow: u64,
}

impl SessionActor {
    fn new(
        config: ClientConfig,
        receiver: mpsc::Receiver<SessionMessage>,
        cancel_token: CancellationToken,
        events: EventBus,
        metrics: Arc<SessionMetrics>,
        channel: Arc<dyn SignalingChannel>,
        peers: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notifier_tx, notifier_rx) = mpsc::unbounded_channel();

        Self {
            config,
            receiver,
            internal_tx,
            internal_rx,
            notifier_tx,
            notifier_rx: Some(notifier_rx),
            cancel_token,
            events,
            metrics,
            channel,
            peers,
            session: Session::new(),
            registry: StreamRegistry::new(),
            pending_publishes: HashMap::new(),
            pending_subscribes: HashMap::new(),
            flows: HashMap::new(),
            pending_connect: None,
            server_events_wired: false,
            epoch: 0,
            next_flow: 0,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.session", fields(instance_id = %self.config.instance_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.session",
            instance_id = %self.config.instance_id,
            "SessionActor started"
        );

        if let Some(notifier_rx) = self.notifier_rx.take() {
            tokio::spawn(run_notifier(
                Arc::clone(&self.channel),
                notifier_rx,
                self.cancel_token.child_token(),
            ));
        }

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.session",
                        instance_id = %self.config.instance_id,
                        "SessionActor received cancellation signal"
                    );
                    self.shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.metrics.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "sc.actor.session",
                                instance_id = %self.config.instance_id,
                                "SessionActor channel closed, exiting"
                            );
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                Some(event) = self.internal_rx.recv() => {
                    self.handle_event(event).await;
                }
            }
        }

        info!(
            target: "sc.actor.session",
            instance_id = %self.config.instance_id,
            messages_processed = self.metrics.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Connect {
                credentials,
                respond_to,
            } => self.connect(credentials, respond_to),

            SessionMessage::Disconnect { respond_to } => {
                self.disconnect().await;
                let _ = respond_to.send(());
            }

            SessionMessage::Publish { stream, respond_to } => self.publish(stream, respond_to),

            SessionMessage::Unpublish {
                stream_id,
                respond_to,
            } => self.unpublish(stream_id, respond_to),

            SessionMessage::Subscribe {
                stream_id,
                respond_to,
            } => self.subscribe(stream_id, respond_to),

            SessionMessage::Unsubscribe {
                stream_id,
                respond_to,
            } => self.unsubscribe(stream_id, respond_to),

            SessionMessage::Send {
                message,
                respond_to,
            } => self.send_custom(message, respond_to),

            SessionMessage::Signal {
                stream_id,
                signal,
                respond_to,
            } => self.signal(stream_id, signal, respond_to),

            SessionMessage::CloseStream {
                stream_id,
                respond_to,
            } => self.close_stream(stream_id, respond_to),

            SessionMessage::SetIceServers {
                servers,
                respond_to,
            } => {
                self.session.ice_servers = normalize_ice_servers(servers);
                debug!(
                    target: "sc.actor.session",
                    count = self.session.ice_servers.len(),
                    "ICE servers set"
                );
                let _ = respond_to.send(self.session.ice_servers.clone());
            }

            SessionMessage::StreamsByAttribute {
                name,
                value,
                respond_to,
            } => {
                let streams = self
                    .registry
                    .find_by_attribute(&name, &value)
                    .into_iter()
                    .map(Stream::info)
                    .collect();
                let _ = respond_to.send(streams);
            }

            SessionMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            SessionMessage::ListStreams { origin, respond_to } => {
                let _ = respond_to.send(self.registry.snapshot(origin));
            }

            SessionMessage::GetStream {
                origin,
                stream_id,
                respond_to,
            } => {
                let info = self.registry.lookup(origin, &stream_id).map(Stream::info);
                let _ = respond_to.send(info);
            }

            SessionMessage::CheckInvariants { respond_to } => {
                let _ = respond_to.send(self.check_invariants());
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Server(wire) => self.handle_server_event(wire).await,

            SessionEvent::ConnectCompleted { epoch, result } => {
                self.on_connect_completed(epoch, result).await;
            }

            SessionEvent::PublishAcked {
                epoch,
                flow,
                result,
            } => self.on_publish_acked(epoch, flow, result),

            SessionEvent::UnpublishCompleted {
                epoch,
                stream_id,
                respond_to,
                result,
            } => self.on_unpublish_completed(epoch, &stream_id, respond_to, result),

            SessionEvent::SubscribeAcked {
                epoch,
                flow,
                result,
            } => self.on_subscribe_acked(epoch, flow, result),

            SessionEvent::UnsubscribeCompleted {
                epoch,
                stream_id,
                respond_to,
                result,
            } => self.on_unsubscribe_completed(epoch, &stream_id, respond_to, result),

            SessionEvent::Peer(event) => self.handle_peer_event(event),

            SessionEvent::RedeliverControl {
                epoch,
                event,
                attempt,
            } => {
                if epoch == self.epoch {
                    self.dispatch_control(event, attempt);
                } else {
                    debug!(
                        target: "sc.control",
                        stream_id = %event.stream_id,
                        kind = event.kind.as_str(),
                        "Redelivery from an earlier session dropped"
                    );
                }
            }
        }
    }

    pub(super) fn next_flow_id(&mut self) -> FlowId {
        self.next_flow += 1;
        FlowId(self.next_flow)
    }

    /// Run a signaling request off the actor task and post its completion
    /// back, tagged with the current epoch.
    pub(super) fn spawn_request<F>(&self, request: SignalingRequest, complete: F)
    where
        F: FnOnce(u64, Result<Value, ChannelError>) -> SessionEvent + Send + 'static,
    {
        let epoch = self.epoch;
        let channel = Arc::clone(&self.channel);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = channel.request(request).await;
            let _ = internal.send(complete(epoch, result));
        });
    }

    /// Queue a fire-and-forget message. Delivered in queue order.
    pub(super) fn notify(&self, request: SignalingRequest) {
        if self.notifier_tx.send(request).is_err() {
            debug!(target: "sc.actor.session", "Notifier stopped, message dropped");
        }
    }

    fn status(&self) -> SessionStatus {
        let unresolved = self
            .flows
            .values()
            .filter(|flow| !flow.resolve.is_resolved())
            .count();
        SessionStatus {
            state: self.session.state,
            client_id: self.session.client_id.clone(),
            local_streams: self.registry.len(Origin::Local),
            remote_streams: self.registry.len(Origin::Remote),
            flows_in_flight: self.pending_publishes.len()
                + self.pending_subscribes.len()
                + unresolved,
            epoch: self.epoch,
        }
    }

    fn check_invariants(&self) -> Vec<String> {
        let mut violations = self.registry.check_invariants();

        for origin in [Origin::Local, Origin::Remote] {
            for id in self.registry.ids(origin) {
                let flow = self.registry.lookup(origin, &id).and_then(Stream::flow);
                if let Some(flow) = flow {
                    match self.flows.get(&flow) {
                        Some(state) if state.stream_id == id => {}
                        Some(state) => violations.push(format!(
                            "{origin} stream {id} negotiates under {flow} owned by stream {}",
                            state.stream_id
                        )),
                        None => violations.push(format!(
                            "{origin} stream {id} negotiates under unknown {flow}"
                        )),
                    }
                }
            }
        }

        let pending = self
            .pending_publishes
            .iter()
            .map(|(id, p)| (id, p.flow))
            .chain(self.pending_subscribes.iter().map(|(id, p)| (id, p.flow)));
        for (id, flow) in pending {
            if flow != *id {
                violations.push(format!("pending {id} stored under {flow}"));
            }
        }

        for (id, flow) in &self.flows {
            if flow.id != *id {
                violations.push(format!("{id} stored under {}", flow.id));
            }
            let terminal = matches!(flow.stage, FlowStage::Ready | FlowStage::Failed);
            if terminal != flow.resolve.is_resolved() {
                violations.push(format!("{id} is {:?} but resolved={}", flow.stage, !terminal));
            }
            let owned = [Origin::Local, Origin::Remote].iter().any(|origin| {
                self.registry
                    .lookup(*origin, &flow.stream_id)
                    .and_then(Stream::flow)
                    == Some(*id)
            });
            if !owned {
                violations.push(format!("{id} has no stream"));
            }
        }

        if self.session.state == SessionState::Disconnected {
            if !self.registry.is_empty() {
                violations.push("streams registered while disconnected".to_string());
            }
            if !self.flows.is_empty()
                || !self.pending_publishes.is_empty()
                || !self.pending_subscribes.is_empty()
            {
                violations.push("flows alive while disconnected".to_string());
            }
        }

        violations
    }

    // --- connection lifecycle ---

    fn connect(
        &mut self,
        credentials: Credentials,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    ) {
        if self.session.state != SessionState::Disconnected {
            warn!(
                target: "sc.actor.session",
                state = %self.session.state,
                "Connect rejected, already connecting or connected"
            );
            let _ = respond_to.send(Err(ClientError::AlreadyConnecting(self.session.state)));
            return;
        }

        self.session.state = SessionState::Connecting;
        self.epoch += 1;
        self.pending_connect = Some(respond_to);
        self.wire_server_events();

        info!(
            target: "sc.actor.session",
            host = %credentials.host,
            secure = credentials.secure,
            epoch = self.epoch,
            "Connecting to session server"
        );

        let epoch = self.epoch;
        let channel = Arc::clone(&self.channel);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match channel.open(&credentials.host, credentials.secure).await {
                Ok(()) => {
                    channel
                        .request(SignalingRequest::Token {
                            token: credentials.token,
                        })
                        .await
                }
                Err(e) => Err(e),
            };
            let _ = internal.send(SessionEvent::ConnectCompleted { epoch, result });
        });
    }

    /// Forward server pushes into the internal channel. Runs once per actor.
    fn wire_server_events(&mut self) {
        if self.server_events_wired {
            return;
        }
        self.server_events_wired = true;

        let Some(mut server_events) = self.channel.take_events() else {
            error!(
                target: "sc.actor.session",
                "Signaling channel push events already taken, server events will be missed"
            );
            return;
        };

        let internal = self.internal_tx.clone();
        let cancel_token = self.cancel_token.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    event = server_events.recv() => match event {
                        Some(event) => {
                            if internal.send(SessionEvent::Server(event)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });
    }

    async fn on_connect_completed(&mut self, epoch: u64, result: Result<Value, ChannelError>) {
        if epoch != self.epoch {
            debug!(
                target: "sc.actor.session",
                epoch,
                current_epoch = self.epoch,
                "Stale connect completion discarded"
            );
            return;
        }
        let Some(respond_to) = self.pending_connect.take() else {
            return;
        };

        let outcome = result.map_err(ClientError::from_request).and_then(|payload| {
            ConnectResponse::from_payload(payload).map_err(|e| ClientError::Protocol(e.to_string()))
        });

        match outcome {
            Ok(response) => {
                self.session.apply(response);
                self.session.state = SessionState::Connected;
                info!(
                    target: "sc.actor.session",
                    epoch = self.epoch,
                    default_video_bandwidth = ?self.session.default_video_bandwidth,
                    max_video_bandwidth = ?self.session.max_video_bandwidth,
                    "Session connected"
                );
                self.events.emit(ClientEvent::ClientConnected);
                let _ = respond_to.send(Ok(()));
            }
            Err(err) => {
                warn!(
                    target: "sc.actor.session",
                    error = %err,
                    "Session connect failed"
                );
                self.fail_connect_attempt().await;
                let _ = respond_to.send(Err(err));
            }
        }
    }

    /// The channel failed or closed underneath the session.
    ///
    /// A pending connect fails with `TransportError` and emits nothing. An
    /// established session runs the full disconnect cycle.
    async fn on_channel_lost(&mut self, reason: String) {
        if let Some(respond_to) = self.pending_connect.take() {
            warn!(
                target: "sc.actor.session",
                reason = %reason,
                "Session connect failed"
            );
            self.fail_connect_attempt().await;
            let _ = respond_to.send(Err(ClientError::TransportError(reason)));
            return;
        }
        if self.session.state == SessionState::Disconnected {
            debug!(
                target: "sc.actor.session",
                reason = %reason,
                "Channel loss ignored while disconnected"
            );
            return;
        }

        warn!(
            target: "sc.actor.session",
            reason = %reason,
            state = %self.session.state,
            "Signaling channel lost"
        );
        self.disconnect().await;
    }

    /// Undo everything a failed connect attempt may have accumulated.
    async fn fail_connect_attempt(&mut self) {
        self.teardown("connect failed");
        close_channel(Arc::clone(&self.channel)).await;
    }

    pub(super) async fn disconnect(&mut self) {
        self.teardown("disconnected");
        close_channel(Arc::clone(&self.channel)).await;
        info!(target: "sc.actor.session", epoch = self.epoch, "Session disconnected");
        self.events.emit(ClientEvent::ClientDisconnected);
    }

    /// Drain every stream and resolve everything outstanding.
    fn teardown(&mut self, reason: &str) {
        self.epoch += 1;

        for mut stream in self.registry.drain(Origin::Remote) {
            if let Some(flow) = stream.detach() {
                self.abort_flow(flow, reason);
            }
            self.events.emit(ClientEvent::StreamRemoved(stream.info()));
        }

        for mut stream in self.registry.drain(Origin::Local) {
            if let Some(flow) = stream.detach() {
                self.abort_flow(flow, reason);
            }
        }

        for (_, pending) in self.pending_publishes.drain() {
            let _ = pending
                .respond_to
                .send(Err(ClientError::Aborted(reason.to_string())));
            self.metrics.flows.flow_aborted();
        }
        for (_, pending) in self.pending_subscribes.drain() {
            let _ = pending
                .respond_to
                .send(Err(ClientError::Aborted(reason.to_string())));
            self.metrics.flows.flow_aborted();
        }
        for (_, mut flow) in self.flows.drain() {
            if flow.resolve.try_resolve() {
                flow.fail(ClientError::Aborted(reason.to_string()));
                self.metrics.flows.flow_aborted();
            }
        }

        if let Some(respond_to) = self.pending_connect.take() {
            let _ = respond_to.send(Err(ClientError::Aborted(reason.to_string())));
        }

        self.session.reset();
    }

    /// Resolve an unresolved flow with `Aborted` and forget it.
    pub(super) fn abort_flow(&mut self, flow: FlowId, reason: &str) {
        if let Some(mut state) = self.flows.remove(&flow) {
            if state.resolve.try_resolve() {
                debug!(
                    target: "sc.actor.session",
                    flow = %flow,
                    kind = state.kind.as_str(),
                    stream_id = %state.stream_id,
                    reason,
                    "Flow aborted"
                );
                state.fail(ClientError::Aborted(reason.to_string()));
                self.metrics.flows.flow_aborted();
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.session.state != SessionState::Disconnected || !self.registry.is_empty() {
            self.teardown("session client shut down");
            close_channel(Arc::clone(&self.channel)).await;
        }
    }

    // --- server events ---

    async fn handle_server_event(&mut self, wire: WireEvent) {
        let event = match ServerEvent::from_wire(&wire.name, wire.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(target: "sc.actor.session", error = %e, "Dropping server event");
                return;
            }
        };

        if self.session.state == SessionState::Disconnected
            && !matches!(event, ServerEvent::ConnectFailed(_) | ServerEvent::Error(_))
        {
            debug!(
                target: "sc.actor.session",
                event = %wire.name,
                "Server event ignored while disconnected"
            );
            return;
        }

        match event {
            ServerEvent::StreamAdded {
                id,
                capabilities,
                attributes,
            } => self.on_stream_added(id, capabilities, attributes),
            ServerEvent::StreamRemoved { id } => self.on_stream_removed(&id),
            ServerEvent::SignalingRelay {
                peer_id,
                stream_id,
                message,
            } => self.on_signaling_relay(peer_id, stream_id, &message),
            ServerEvent::PublishAck { id } => {
                info!(target: "sc.flow.publish", stream_id = %id, "Stream published");
                self.emit_for_local(&id, ClientEvent::StreamPublished);
            }
            ServerEvent::VideoHold { id } => self.dispatch_control(
                ControlEvent {
                    kind: ControlEventKind::VideoHold,
                    stream_id: id,
                },
                0,
            ),
            ServerEvent::VideoReady { id } => self.dispatch_control(
                ControlEvent {
                    kind: ControlEventKind::VideoReady,
                    stream_id: id,
                },
                0,
            ),
            ServerEvent::AudioHold { id } => self.dispatch_control(
                ControlEvent {
                    kind: ControlEventKind::AudioHold,
                    stream_id: id,
                },
                0,
            ),
            ServerEvent::AudioReady { id } => self.dispatch_control(
                ControlEvent {
                    kind: ControlEventKind::AudioReady,
                    stream_id: id,
                },
                0,
            ),
            ServerEvent::AllAudioHold => self.dispatch_control_to_all(ControlEventKind::AudioHold),
            ServerEvent::AllAudioReady => {
                self.dispatch_control_to_all(ControlEventKind::AudioReady);
            }
            ServerEvent::VideoOn { id } => self.emit_for_local(&id, ClientEvent::VideoOn),
            ServerEvent::VideoOff { id } => self.emit_for_local(&id, ClientEvent::VideoOff),
            ServerEvent::AudioOn { id } => self.emit_for_local(&id, ClientEvent::AudioOn),
            ServerEvent::AudioOff { id } => self.emit_for_local(&id, ClientEvent::AudioOff),
            ServerEvent::ClientJoined { user, attributes } => {
                self.events
                    .emit(ClientEvent::ClientJoined { user, attributes });
            }
            ServerEvent::ClientLeft { user, attributes } => {
                self.events.emit(ClientEvent::ClientLeft { user, attributes });
            }
            ServerEvent::ClientId(client_id) => {
                info!(target: "sc.actor.session", client_id = %client_id, "Client id assigned");
                self.session.client_id = Some(client_id.clone());
                self.events.emit(ClientEvent::ClientId(client_id));
            }
            ServerEvent::CustomMessage(message) => {
                self.events.emit(ClientEvent::MessageReceived(message));
            }
            ServerEvent::ConnectFailed(reason) => {
                self.on_channel_lost(reason.unwrap_or_else(|| "connection_failed".to_string()))
                    .await;
            }
            ServerEvent::Error(reason) => {
                self.on_channel_lost(reason.unwrap_or_else(|| "connection_error".to_string()))
                    .await;
            }
            ServerEvent::ConnectivityLost => {
                warn!(target: "sc.actor.session", "ICE connectivity lost");
                self.events.emit(ClientEvent::StreamFailed);
            }
            ServerEvent::Disconnected => {
                info!(target: "sc.actor.session", "Signaling channel disconnected");
                self.on_channel_lost("channel closed".to_string()).await;
            }
        }
    }

    fn on_stream_added(&mut self, id: StreamId, capabilities: Capabilities, attributes: Attributes) {
        let stream = Stream::remote(id, capabilities, attributes);
        let info = stream.info();
        match self.registry.register(Origin::Remote, stream) {
            Ok(()) => self.events.emit(ClientEvent::StreamAdded(info)),
            Err(e) => warn!(target: "sc.registry", error = %e, "Ignoring stream announcement"),
        }
    }

    fn on_stream_removed(&mut self, id: &StreamId) {
        let Some(mut stream) = self.registry.unregister(Origin::Remote, id) else {
            debug!(target: "sc.registry", stream_id = %id, "Removal of unknown stream ignored");
            return;
        };
        if let Some(flow) = stream.detach() {
            self.abort_flow(flow, "stream removed");
        }

        let pending: Vec<FlowId> = self
            .pending_subscribes
            .values()
            .filter(|p| &p.stream_id == id)
            .map(|p| p.flow)
            .collect();
        for flow in pending {
            if let Some(p) = self.pending_subscribes.remove(&flow) {
                let _ = p
                    .respond_to
                    .send(Err(ClientError::Aborted("stream removed".to_string())));
                self.metrics.flows.flow_aborted();
            }
        }

        self.events.emit(ClientEvent::StreamRemoved(stream.info()));
    }

    fn on_signaling_relay(
        &mut self,
        peer_id: Option<StreamId>,
        stream_id: Option<StreamId>,
        message: &Value,
    ) {
        let (origin, id) = match (peer_id, stream_id) {
            (Some(peer_id), _) => (Origin::Remote, peer_id),
            (None, Some(stream_id)) => (Origin::Local, stream_id),
            (None, None) => return,
        };

        let negotiation = self
            .registry
            .lookup_mut(origin, &id)
            .and_then(|stream| stream.negotiation.as_mut());
        match negotiation {
            Some(negotiation) => {
                if let Err(e) = negotiation.peer.process_signaling_message(message) {
                    warn!(
                        target: "sc.actor.session",
                        origin = %origin,
                        stream_id = %id,
                        error = %e,
                        "Peer connection rejected signaling message"
                    );
                }
            }
            None => debug!(
                target: "sc.actor.session",
                origin = %origin,
                stream_id = %id,
                "Signaling message for unknown stream dropped"
            ),
        }
    }

    fn emit_for_local(&self, id: &StreamId, event: fn(StreamInfo) -> ClientEvent) {
        match self.registry.lookup(Origin::Local, id) {
            Some(stream) => self.events.emit(event(stream.info())),
            None => debug!(target: "sc.actor.session", stream_id = %id, "Event for unknown local stream dropped"),
        }
    }

    // --- peer reports ---

    fn handle_peer_event(&mut self, event: PeerEvent) {
        let current = self
            .registry
            .lookup(event.origin, &event.stream_id)
            .and_then(Stream::flow);
        if current != Some(event.flow) {
            debug!(
                target: "sc.actor.session",
                origin = %event.origin,
                stream_id = %event.stream_id,
                flow = %event.flow,
                "Report from inactive peer connection dropped"
            );
            return;
        }

        match event.kind {
            PeerEventKind::Signaling(message) => {
                let profile = match event.origin {
                    Origin::Local => None,
                    Origin::Remote => Some(self.config.negotiation_profile.clone()),
                };
                self.notify(SignalingRequest::SignalingMessage {
                    stream_id: event.stream_id,
                    message,
                    profile,
                });
            }
            PeerEventKind::Connectivity(state) => match event.origin {
                Origin::Local => self.on_publish_connectivity(event.flow, &event.stream_id, state),
                Origin::Remote => {
                    self.on_subscribe_connectivity(event.flow, &event.stream_id, state);
                }
            },
            PeerEventKind::MediaArrived(media) => match event.origin {
                Origin::Remote => self.on_media_arrived(event.flow, &event.stream_id, media),
                Origin::Local => debug!(
                    target: "sc.flow.publish",
                    stream_id = %event.stream_id,
                    "Inbound media on a published stream ignored"
                ),
            },
        }
    }
}

async fn close_channel(channel: Arc<dyn SignalingChannel>) {
    if let Err(e) = channel.close().await {
        debug!(target: "sc.actor.session", error = %e, "Signaling channel already closed");
    }
}

/// Deliver notifications one at a time, in queue order.
async fn run_notifier(
    channel: Arc<dyn SignalingChannel>,
    mut queue: mpsc::UnboundedReceiver<SignalingRequest>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            request = queue.recv() => {
                let Some(request) = request else { break };
                let message_type = request.name();
                if let Err(e) = channel.notify(request).await {
                    debug!(
                        target: "sc.actor.session",
                        message_type,
                        error = %e,
                        "Notification not delivered"
                    );
                }
            }
        }
    }
}
