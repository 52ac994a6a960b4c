//! Stream controls and application messages.
//!
//! Outbound: play/pause signals travel as `control` custom messages, and
//! only for streams whose controls are wired (flow ready).
//!
//! Inbound: hold/ready notifications are surfaced once the subscription's
//! controls are wired. A notification that arrives while the subscription
//! is still negotiating is redelivered on a fixed interval, up to
//! `control_retry_limit` attempts.

use super::messages::{ControlEvent, ControlEventKind, SessionEvent};
use super::session::{SessionActor, SessionState};
use crate::errors::ClientError;
use crate::events::ClientEvent;
use crate::signaling::{ControlAction, ControlSignal, SignalingRequest};
use crate::stream::{Origin, StreamInfo};
use common::types::StreamId;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type ValueReply = oneshot::Sender<Result<Value, ClientError>>;

impl ControlEventKind {
    fn event(self, stream: StreamInfo) -> ClientEvent {
        match self {
            ControlEventKind::VideoHold => ClientEvent::VideoHold(stream),
            ControlEventKind::VideoReady => ClientEvent::VideoReady(stream),
            ControlEventKind::AudioHold => ClientEvent::AudioHold(stream),
            ControlEventKind::AudioReady => ClientEvent::AudioReady(stream),
        }
    }
}

impl SessionActor {
    pub(super) fn signal(&mut self, stream_id: StreamId, signal: ControlSignal, respond_to: ValueReply) {
        if self.session.state != SessionState::Connected {
            let _ = respond_to.send(Err(ClientError::NotConnected));
            return;
        }

        let found = [Origin::Local, Origin::Remote]
            .into_iter()
            .filter_map(|origin| self.registry.lookup(origin, &stream_id))
            .map(|stream| (stream.origin, stream.controls_wired))
            .collect::<Vec<_>>();
        let wired = found.iter().find(|(_, wired)| *wired).map(|(origin, _)| *origin);

        let origin = match (wired, found.is_empty()) {
            (Some(origin), _) => origin,
            (None, true) => {
                let _ = respond_to.send(Err(ClientError::StreamNotFound(stream_id.to_string())));
                return;
            }
            (None, false) => {
                let _ = respond_to.send(Err(ClientError::ControlNotReady(stream_id.to_string())));
                return;
            }
        };

        let action = ControlAction::for_signal(origin, signal);
        debug!(
            target: "sc.control",
            stream_id = %stream_id,
            action = action.as_str(),
            "Sending control signal"
        );
        self.spawn_value_request(SignalingRequest::control(action, &stream_id), respond_to);
    }

    pub(super) fn send_custom(&mut self, message: Value, respond_to: ValueReply) {
        if self.session.state != SessionState::Connected {
            let _ = respond_to.send(Err(ClientError::NotConnected));
            return;
        }
        self.spawn_value_request(SignalingRequest::CustomMessage(message), respond_to);
    }

    /// Requests whose answer goes straight back to the caller.
    fn spawn_value_request(&self, request: SignalingRequest, respond_to: ValueReply) {
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            let result = channel
                .request(request)
                .await
                .map_err(ClientError::from_request);
            let _ = respond_to.send(result);
        });
    }

    pub(super) fn dispatch_control(&mut self, event: ControlEvent, attempt: u32) {
        let Some(stream) = self.registry.lookup(Origin::Remote, &event.stream_id) else {
            debug!(
                target: "sc.control",
                stream_id = %event.stream_id,
                kind = event.kind.as_str(),
                "Control notification for unknown stream dropped"
            );
            return;
        };

        if stream.controls_wired {
            self.events.emit(event.kind.event(stream.info()));
            return;
        }
        if stream.negotiation.is_none() {
            warn!(
                target: "sc.control",
                stream_id = %event.stream_id,
                kind = event.kind.as_str(),
                "Control notification missed, stream is not subscribed"
            );
            return;
        }
        if attempt >= self.config.control_retry_limit {
            warn!(
                target: "sc.control",
                stream_id = %event.stream_id,
                kind = event.kind.as_str(),
                attempts = attempt,
                "Control notification dropped, controls never became ready"
            );
            return;
        }

        self.schedule_redelivery(event, attempt + 1);
    }

    pub(super) fn dispatch_control_to_all(&mut self, kind: ControlEventKind) {
        for stream_id in self.registry.ids(Origin::Remote) {
            self.dispatch_control(ControlEvent { kind, stream_id }, 0);
        }
    }

    fn schedule_redelivery(&self, event: ControlEvent, attempt: u32) {
        let interval = self.config.control_retry_interval;
        let epoch = self.epoch;
        let internal = self.internal_tx.clone();
        let cancel_token = self.cancel_token.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {}
                () = tokio::time::sleep(interval) => {
                    let _ = internal.send(SessionEvent::RedeliverControl {
                        epoch,
                        event,
                        attempt,
                    });
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stream::{Capabilities, Stream};

    #[test]
    fn test_control_kind_maps_to_event() {
        let stream = Stream::remote(
            StreamId::new("5"),
            Capabilities {
                audio: true,
                video: false,
                screen: false,
            },
            Default::default(),
        )
        .info();

        let event = ControlEventKind::AudioHold.event(stream.clone());
        assert_eq!(event.name(), "audio-hold");
        assert_eq!(event.stream(), Some(&stream));
        assert_eq!(
            ControlEventKind::VideoReady.event(stream).name(),
            "video-ready"
        );
    }
}
