//! Publish flow.
//!
//! ```text
//! publish() -> [publish request] -> ack(id)
//!   url source:  registered Ready, resolves with id
//!   live source: peer connection + offer -> Negotiating
//!                connectivity ready  -> Ready, resolves with id
//!                connectivity failed -> unpublish, unregister, NegotiationFailed
//! ```

use super::flow::{Flow, FlowId, FlowKind, FlowResponder, PendingPublish, PublishMedia};
use super::messages::SessionEvent;
use super::session::{SessionActor, SessionState};
use crate::errors::ClientError;
use crate::peer::{
    ConnectivityState, PeerConnection, PeerConnectionConfig, PeerError, PeerEventSink,
};
use crate::signaling::{ChannelError, PublishResponse, PublishSource, SignalingRequest};
use crate::stream::{
    LocalSource, LocalStream, MediaHandle, Negotiation, Origin, Stream, StreamStatus,
};
use common::types::StreamId;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type PublishReply = oneshot::Sender<Result<StreamId, ClientError>>;

/// Requested bandwidth, falling back to `default`, never above `ceiling`.
pub(super) fn capped(
    requested: Option<u32>,
    default: Option<u32>,
    ceiling: Option<u32>,
) -> Option<u32> {
    match (requested.or(default), ceiling) {
        (Some(wanted), Some(ceiling)) => Some(wanted.min(ceiling)),
        (wanted, _) => wanted,
    }
}

fn start_offer(peer: &mut dyn PeerConnection, media: MediaHandle) -> Result<(), PeerError> {
    peer.attach_local_media(media)?;
    peer.create_offer(false)
}

impl SessionActor {
    pub(super) fn publish(&mut self, stream: LocalStream, respond_to: PublishReply) {
        let media = match self.validate_publish(&stream) {
            Ok(media) => media,
            Err(err) => {
                debug!(target: "sc.flow.publish", error = %err, "Publish rejected");
                let _ = respond_to.send(Err(err));
                return;
            }
        };

        let source = match &media {
            PublishMedia::Url(url) => PublishSource::Url(url.clone()),
            PublishMedia::Live(_) => PublishSource::Live,
        };
        let request = SignalingRequest::Publish {
            source,
            audio: stream.capabilities.audio,
            video: stream.capabilities.video || stream.capabilities.screen,
            attributes: stream.attributes.clone(),
        };

        let flow = self.next_flow_id();
        self.metrics.flows.flow_started(FlowKind::Publish);
        info!(
            target: "sc.flow.publish",
            flow = %flow,
            key = %stream.key.0,
            "Publishing stream"
        );

        self.pending_publishes.insert(
            flow,
            PendingPublish {
                flow,
                stream,
                media,
                respond_to,
            },
        );
        self.spawn_request(request, move |epoch, result| SessionEvent::PublishAcked {
            epoch,
            flow,
            result,
        });
    }

    /// Check the session and the stream; yields the media to publish.
    fn validate_publish(&self, stream: &LocalStream) -> Result<PublishMedia, ClientError> {
        if self.session.state != SessionState::Connected {
            return Err(ClientError::NotConnected);
        }
        if !stream.capabilities.any() {
            return Err(ClientError::InvalidStream(
                "stream has no audio, video or screen".to_string(),
            ));
        }
        let media = match &stream.source {
            LocalSource::Url(url) => PublishMedia::Url(url.clone()),
            LocalSource::Live(media) => PublishMedia::Live(Arc::clone(media)),
            LocalSource::Unavailable => {
                return Err(ClientError::InvalidStream(
                    "stream access not ready".to_string(),
                ));
            }
        };
        let pending = self
            .pending_publishes
            .values()
            .any(|p| p.stream.key == stream.key);
        if pending || self.registry.find_local_by_key(stream.key).is_some() {
            return Err(ClientError::InvalidStream(
                "stream already published".to_string(),
            ));
        }
        Ok(media)
    }

    pub(super) fn on_publish_acked(
        &mut self,
        epoch: u64,
        flow: FlowId,
        result: Result<Value, ChannelError>,
    ) {
        if epoch != self.epoch {
            debug!(target: "sc.flow.publish", flow = %flow, "Stale publish ack discarded");
            return;
        }
        let Some(PendingPublish {
            stream,
            media,
            respond_to,
            ..
        }) = self.pending_publishes.remove(&flow)
        else {
            return;
        };

        let id = match self.accept_publish_ack(result) {
            Ok(id) => id,
            Err(err) => {
                warn!(target: "sc.flow.publish", flow = %flow, error = %err, "Publish failed");
                self.metrics.flows.flow_failed();
                let _ = respond_to.send(Err(err));
                return;
            }
        };

        match media {
            PublishMedia::Url(url) => {
                let mut registered = Stream::local(id.clone(), &stream);
                registered.status = StreamStatus::Ready;
                registered.close_hook = true;
                if let Err(e) = self.registry.register(Origin::Local, registered) {
                    self.metrics.flows.flow_failed();
                    let _ = respond_to.send(Err(ClientError::Protocol(e.to_string())));
                    return;
                }
                info!(target: "sc.flow.publish", stream_id = %id, url = %url, "URL stream published");
                self.metrics.flows.flow_ready();
                let _ = respond_to.send(Ok(id));
            }
            PublishMedia::Live(media) => {
                self.start_publish_negotiation(flow, id, &stream, media, respond_to);
            }
        }
    }

    fn accept_publish_ack(&self, result: Result<Value, ChannelError>) -> Result<StreamId, ClientError> {
        let payload = result.map_err(ClientError::from_request)?;
        let id = PublishResponse::from_payload(payload)
            .map_err(|e| ClientError::Protocol(e.to_string()))?
            .id;
        if self.registry.contains(Origin::Local, &id) {
            return Err(ClientError::Protocol(format!(
                "server assigned duplicate stream id {id}"
            )));
        }
        Ok(id)
    }

    fn start_publish_negotiation(
        &mut self,
        flow: FlowId,
        id: StreamId,
        local: &LocalStream,
        media: MediaHandle,
        respond_to: PublishReply,
    ) {
        let config = PeerConnectionConfig {
            audio: local.capabilities.audio,
            video: local.capabilities.video || local.capabilities.screen,
            ice_servers: self.session.ice_servers.clone(),
            stun_server_url: self.session.stun_server_url.clone(),
            turn_server: self.session.turn_server.clone(),
            max_audio_bandwidth: capped(
                local.max_audio_bandwidth,
                None,
                self.config.max_audio_bandwidth,
            ),
            max_video_bandwidth: capped(
                local.max_video_bandwidth,
                self.session.default_video_bandwidth,
                self.session.max_video_bandwidth,
            ),
        };
        let sink = PeerEventSink::new(Origin::Local, id.clone(), flow, self.internal_tx.clone());

        let mut peer = match self.peers.create(config, sink) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(target: "sc.flow.publish", stream_id = %id, error = %e, "Peer connection not created");
                self.abandon_publish(id, respond_to);
                return;
            }
        };
        if let Err(e) = start_offer(peer.as_mut(), media) {
            warn!(target: "sc.flow.publish", stream_id = %id, error = %e, "Publish negotiation not started");
            peer.close();
            self.abandon_publish(id, respond_to);
            return;
        }

        let mut stream = Stream::local(id.clone(), local);
        stream.negotiation = Some(Negotiation { flow, peer });
        stream.status = StreamStatus::Negotiating;
        if let Err(e) = self.registry.register(Origin::Local, stream) {
            self.metrics.flows.flow_failed();
            let _ = respond_to.send(Err(ClientError::Protocol(e.to_string())));
            return;
        }

        debug!(target: "sc.flow.publish", flow = %flow, stream_id = %id, "Negotiating");
        self.flows.insert(
            flow,
            Flow::new(
                flow,
                FlowKind::Publish,
                id,
                FlowResponder::Publish(respond_to),
            ),
        );
    }

    fn abandon_publish(&mut self, id: StreamId, respond_to: PublishReply) {
        self.notify(SignalingRequest::Unpublish { stream_id: id });
        self.metrics.flows.flow_failed();
        let _ = respond_to.send(Err(ClientError::NegotiationFailed));
    }

    pub(super) fn on_publish_connectivity(
        &mut self,
        flow: FlowId,
        stream_id: &StreamId,
        state: ConnectivityState,
    ) {
        debug!(
            target: "sc.flow.publish",
            flow = %flow,
            stream_id = %stream_id,
            state = %state,
            "Connectivity changed"
        );

        if state.is_ready() {
            let Some(flow_state) = self.flows.get_mut(&flow) else {
                return;
            };
            if !flow_state.resolve.try_resolve() {
                return;
            }
            flow_state.channel_ready = true;
            if let Some(stream) = self.registry.lookup_mut(Origin::Local, stream_id) {
                stream.status = StreamStatus::Ready;
                stream.controls_wired = true;
                stream.close_hook = true;
            }
            flow_state.succeed();
            self.metrics.flows.flow_ready();
            info!(target: "sc.flow.publish", flow = %flow, stream_id = %stream_id, "Stream ready");
        } else if state == ConnectivityState::Failed {
            let claimed = self
                .flows
                .get(&flow)
                .is_some_and(|f| f.resolve.try_resolve());
            if !claimed {
                return;
            }
            warn!(target: "sc.flow.publish", flow = %flow, stream_id = %stream_id, "Publish negotiation failed");
            self.notify(SignalingRequest::Unpublish {
                stream_id: stream_id.clone(),
            });
            if let Some(mut stream) = self.registry.unregister(Origin::Local, stream_id) {
                stream.detach();
            }
            if let Some(mut flow_state) = self.flows.remove(&flow) {
                flow_state.fail(ClientError::NegotiationFailed);
            }
            self.metrics.flows.flow_failed();
        }
    }

    pub(super) fn unpublish(
        &mut self,
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    ) {
        if self.session.state != SessionState::Connected {
            let _ = respond_to.send(Err(ClientError::NotConnected));
            return;
        }
        if !self.registry.contains(Origin::Local, &stream_id) {
            let _ = respond_to.send(Err(ClientError::InvalidStream(
                "stream is not local".to_string(),
            )));
            return;
        }

        info!(target: "sc.flow.publish", stream_id = %stream_id, "Unpublishing stream");
        let request = SignalingRequest::Unpublish {
            stream_id: stream_id.clone(),
        };
        self.spawn_request(request, move |epoch, result| {
            SessionEvent::UnpublishCompleted {
                epoch,
                stream_id,
                respond_to,
                result,
            }
        });
    }

    pub(super) fn on_unpublish_completed(
        &mut self,
        epoch: u64,
        stream_id: &StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
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

        if let Some(mut stream) = self.registry.unregister(Origin::Local, stream_id) {
            if let Some(flow) = stream.detach() {
                self.abort_flow(flow, "stream unpublished");
            }
        }
        info!(target: "sc.flow.publish", stream_id = %stream_id, "Stream unpublished");
        let _ = respond_to.send(Ok(()));
    }

    pub(super) fn close_stream(
        &mut self,
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    ) {
        match self.registry.lookup(Origin::Local, &stream_id) {
            None => {
                let _ = respond_to.send(Err(ClientError::InvalidStream(
                    "stream is not local".to_string(),
                )));
            }
            Some(stream) if !stream.close_hook => {
                let _ = respond_to.send(Err(ClientError::ControlNotReady(stream_id.to_string())));
            }
            Some(_) => self.unpublish(stream_id, respond_to),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_uses_request_then_default() {
        assert_eq!(capped(Some(400), Some(300), None), Some(400));
        assert_eq!(capped(None, Some(300), None), Some(300));
        assert_eq!(capped(None, None, None), None);
    }

    #[test]
    fn test_capped_never_exceeds_ceiling() {
        assert_eq!(capped(Some(2000), Some(300), Some(1000)), Some(1000));
        assert_eq!(capped(None, Some(1500), Some(1000)), Some(1000));
        assert_eq!(capped(Some(500), None, Some(1000)), Some(500));
        assert_eq!(capped(None, None, Some(1000)), None);
    }
}
