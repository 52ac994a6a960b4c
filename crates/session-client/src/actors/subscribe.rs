//! Subscribe flow.
//!
//! A subscription is ready once inbound media has arrived AND connectivity
//! reached connected/completed. The two reports may come in either order;
//! whichever completes the pair resolves the flow.

use super::flow::{Flow, FlowId, FlowKind, FlowResponder, PendingSubscribe};
use super::messages::SessionEvent;
use super::session::{SessionActor, SessionState};
use crate::errors::ClientError;
use crate::events::ClientEvent;
use crate::peer::{ConnectivityState, PeerConnectionConfig, PeerEventSink};
use crate::signaling::{ChannelError, SignalingRequest};
use crate::stream::{MediaHandle, Negotiation, Origin, StreamStatus};
use common::types::StreamId;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type SubscribeReply = oneshot::Sender<Result<(), ClientError>>;

/// Map a failed `subscribe` request.
fn subscribe_error(err: ChannelError) -> ClientError {
    match err {
        ChannelError::Rejected(reason) => ClientError::SubscribeRejected(reason),
        ChannelError::Timeout => ClientError::SubscribeRejected("timeout".to_string()),
        other => ClientError::from_request(other),
    }
}

impl SessionActor {
    pub(super) fn subscribe(&mut self, stream_id: StreamId, respond_to: SubscribeReply) {
        let request = match self.validate_subscribe(&stream_id) {
            Ok(request) => request,
            Err(err) => {
                debug!(target: "sc.flow.subscribe", stream_id = %stream_id, error = %err, "Subscribe rejected");
                let _ = respond_to.send(Err(err));
                return;
            }
        };

        let flow = self.next_flow_id();
        self.metrics.flows.flow_started(FlowKind::Subscribe);
        info!(target: "sc.flow.subscribe", flow = %flow, stream_id = %stream_id, "Subscribing");

        self.pending_subscribes.insert(
            flow,
            PendingSubscribe {
                flow,
                stream_id,
                respond_to,
            },
        );
        self.spawn_request(request, move |epoch, result| SessionEvent::SubscribeAcked {
            epoch,
            flow,
            result,
        });
    }

    fn validate_subscribe(&self, stream_id: &StreamId) -> Result<SignalingRequest, ClientError> {
        if self.session.state != SessionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let Some(stream) = self.registry.lookup(Origin::Remote, stream_id) else {
            if self.registry.contains(Origin::Local, stream_id) {
                return Err(ClientError::InvalidStream("stream is local".to_string()));
            }
            return Err(ClientError::StreamNotFound(stream_id.to_string()));
        };
        if !stream.capabilities.any() {
            return Err(ClientError::NoMedia);
        }
        let pending = self
            .pending_subscribes
            .values()
            .any(|p| &p.stream_id == stream_id);
        if pending || stream.negotiation.is_some() {
            return Err(ClientError::InvalidStream(
                "stream already subscribed".to_string(),
            ));
        }

        Ok(SignalingRequest::Subscribe {
            stream_id: stream_id.clone(),
            audio: stream.capabilities.audio,
            video: stream.capabilities.video || stream.capabilities.screen,
            profile: self.config.negotiation_profile.clone(),
        })
    }

    pub(super) fn on_subscribe_acked(
        &mut self,
        epoch: u64,
        flow: FlowId,
        result: Result<Value, ChannelError>,
    ) {
        if epoch != self.epoch {
            debug!(target: "sc.flow.subscribe", flow = %flow, "Stale subscribe ack discarded");
            return;
        }
        let Some(pending) = self.pending_subscribes.remove(&flow) else {
            return;
        };
        let PendingSubscribe {
            stream_id,
            respond_to,
            ..
        } = pending;

        if let Err(e) = result {
            let err = subscribe_error(e);
            warn!(target: "sc.flow.subscribe", stream_id = %stream_id, error = %err, "Subscribe failed");
            self.metrics.flows.flow_failed();
            let _ = respond_to.send(Err(err));
            return;
        }

        let Some(stream) = self.registry.lookup(Origin::Remote, &stream_id) else {
            self.metrics.flows.flow_aborted();
            let _ = respond_to.send(Err(ClientError::Aborted("stream removed".to_string())));
            return;
        };

        let config = PeerConnectionConfig {
            audio: stream.capabilities.audio,
            video: stream.capabilities.video || stream.capabilities.screen,
            ice_servers: self.session.ice_servers.clone(),
            stun_server_url: self.session.stun_server_url.clone(),
            turn_server: self.session.turn_server.clone(),
            max_audio_bandwidth: None,
            max_video_bandwidth: None,
        };
        let sink = PeerEventSink::new(
            Origin::Remote,
            stream_id.clone(),
            flow,
            self.internal_tx.clone(),
        );

        let mut peer = match self.peers.create(config, sink) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(target: "sc.flow.subscribe", stream_id = %stream_id, error = %e, "Peer connection not created");
                self.abandon_subscribe(stream_id, respond_to);
                return;
            }
        };
        if let Err(e) = peer.create_offer(true) {
            warn!(target: "sc.flow.subscribe", stream_id = %stream_id, error = %e, "Subscribe negotiation not started");
            peer.close();
            self.abandon_subscribe(stream_id, respond_to);
            return;
        }

        if let Some(stream) = self.registry.lookup_mut(Origin::Remote, &stream_id) {
            stream.negotiation = Some(Negotiation { flow, peer });
            stream.status = StreamStatus::Negotiating;
        }
        debug!(target: "sc.flow.subscribe", flow = %flow, stream_id = %stream_id, "Negotiating");
        self.flows.insert(
            flow,
            Flow::new(
                flow,
                FlowKind::Subscribe,
                stream_id,
                FlowResponder::Subscribe(respond_to),
            ),
        );
    }

    fn abandon_subscribe(&mut self, stream_id: StreamId, respond_to: SubscribeReply) {
        self.notify(SignalingRequest::Unsubscribe { stream_id });
        self.metrics.flows.flow_failed();
        let _ = respond_to.send(Err(ClientError::NegotiationFailed));
    }

    pub(super) fn on_subscribe_connectivity(
        &mut self,
        flow: FlowId,
        stream_id: &StreamId,
        state: ConnectivityState,
    ) {
        debug!(
            target: "sc.flow.subscribe",
            flow = %flow,
            stream_id = %stream_id,
            state = %state,
            "Connectivity changed"
        );

        if state.is_ready() {
            let Some(flow_state) = self.flows.get_mut(&flow) else {
                return;
            };
            if flow_state.resolve.is_resolved() {
                return;
            }
            flow_state.channel_ready = true;
            if let Some(stream) = self.registry.lookup_mut(Origin::Remote, stream_id) {
                stream.controls_wired = true;
            }
            self.try_complete_subscribe(flow, stream_id);
        } else if state == ConnectivityState::Failed {
            let claimed = self
                .flows
                .get(&flow)
                .is_some_and(|f| f.resolve.try_resolve());
            if !claimed {
                return;
            }
            warn!(target: "sc.flow.subscribe", flow = %flow, stream_id = %stream_id, "Subscribe negotiation failed");
            self.notify(SignalingRequest::Unsubscribe {
                stream_id: stream_id.clone(),
            });
            // The stream stays announced; only the subscription goes.
            if let Some(stream) = self.registry.lookup_mut(Origin::Remote, stream_id) {
                stream.detach();
            }
            if let Some(mut flow_state) = self.flows.remove(&flow) {
                flow_state.fail(ClientError::NegotiationFailed);
            }
            self.metrics.flows.flow_failed();
        }
    }

    pub(super) fn on_media_arrived(&mut self, flow: FlowId, stream_id: &StreamId, media: MediaHandle) {
        let Some(flow_state) = self.flows.get_mut(&flow) else {
            return;
        };
        flow_state.media_arrived = true;
        if let Some(stream) = self.registry.lookup_mut(Origin::Remote, stream_id) {
            stream.media = Some(media);
        }
        debug!(target: "sc.flow.subscribe", flow = %flow, stream_id = %stream_id, "Media arrived");
        self.try_complete_subscribe(flow, stream_id);
    }

    fn try_complete_subscribe(&mut self, flow: FlowId, stream_id: &StreamId) {
        let Some(flow_state) = self.flows.get_mut(&flow) else {
            return;
        };
        if !(flow_state.media_arrived && flow_state.channel_ready) {
            return;
        }
        if !flow_state.resolve.try_resolve() {
            return;
        }

        let info = self
            .registry
            .lookup_mut(Origin::Remote, stream_id)
            .map(|stream| {
                stream.status = StreamStatus::Ready;
                stream.info()
            });
        if let Some(info) = info {
            self.events.emit(ClientEvent::StreamSubscribed(info));
        }
        flow_state.succeed();
        self.metrics.flows.flow_ready();
        info!(target: "sc.flow.subscribe", flow = %flow, stream_id = %stream_id, "Subscribed");
    }

    pub(super) fn unsubscribe(&mut self, stream_id: StreamId, respond_to: SubscribeReply) {
        if self.session.state != SessionState::Connected {
            let _ = respond_to.send(Err(ClientError::NotConnected));
            return;
        }
        if !self.registry.contains(Origin::Remote, &stream_id) {
            let _ = respond_to.send(Err(ClientError::StreamNotFound(stream_id.to_string())));
            return;
        }

        info!(target: "sc.flow.subscribe", stream_id = %stream_id, "Unsubscribing");
        let request = SignalingRequest::Unsubscribe {
            stream_id: stream_id.clone(),
        };
        self.spawn_request(request, move |epoch, result| {
            SessionEvent::UnsubscribeCompleted {
                epoch,
                stream_id,
                respond_to,
                result,
            }
        });
    }

    pub(super) fn on_unsubscribe_completed(
        &mut self,
        epoch: u64,
        stream_id: &StreamId,
        respond_to: SubscribeReply,
        result: Result<Value, ChannelError>,
    ) {
        if epoch != self.epoch {
            let _ = respond_to.send(Err(ClientError::Aborted("disconnected".to_string())));
            return;
        }
        if let Err(e) = result {
            let _ = respond_to.send(Err(ClientError::from_request(e)));
            return;
        }

        let flow = self
            .registry
            .lookup_mut(Origin::Remote, stream_id)
            .and_then(|stream| stream.detach());
        if let Some(flow) = flow {
            self.abort_flow(flow, "unsubscribed");
        }
        info!(target: "sc.flow.subscribe", stream_id = %stream_id, "Unsubscribed");
        let _ = respond_to.send(Ok(()));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_error_mapping() {
        assert!(matches!(
            subscribe_error(ChannelError::Rejected("no such stream".to_string())),
            ClientError::SubscribeRejected(reason) if reason == "no such stream"
        ));
        assert!(matches!(
            subscribe_error(ChannelError::Timeout),
            ClientError::SubscribeRejected(reason) if reason == "timeout"
        ));
        assert!(matches!(
            subscribe_error(ChannelError::NotOpen),
            ClientError::TransportError(_)
        ));
    }
}
