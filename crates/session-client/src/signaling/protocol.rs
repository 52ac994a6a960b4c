//! Wire protocol between the session client and the session server.
//!
//! Server pushes arrive as `(name, payload)` pairs and are decoded into the
//! closed [`ServerEvent`] enum at the boundary. Unknown names and payloads
//! missing required fields are rejected with [`ProtocolError`] and never
//! reach the session state machine.

use crate::stream::{Attributes, Capabilities, Origin};
use common::secret::{ExposeSecret, SecretString};
use common::types::{ClientId, StreamId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A push event as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    pub name: String,
    pub payload: Value,
}

impl WireEvent {
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown server event: {0}")]
    UnknownEvent(String),

    #[error("malformed {event} payload: {reason}")]
    Malformed { event: String, reason: String },
}

/// Server-pushed events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A remote participant published a stream.
    StreamAdded {
        id: StreamId,
        capabilities: Capabilities,
        attributes: Attributes,
    },
    /// A remote stream went away.
    StreamRemoved { id: StreamId },
    /// Negotiation message for a stream. `peer_id` addresses a remote
    /// (subscribed) stream, otherwise `stream_id` addresses a local one.
    SignalingRelay {
        peer_id: Option<StreamId>,
        stream_id: Option<StreamId>,
        message: Value,
    },
    /// The server finished publishing a local stream.
    PublishAck { id: StreamId },
    VideoHold { id: StreamId },
    VideoReady { id: StreamId },
    AudioHold { id: StreamId },
    AudioReady { id: StreamId },
    AllAudioHold,
    AllAudioReady,
    VideoOn { id: StreamId },
    VideoOff { id: StreamId },
    AudioOn { id: StreamId },
    AudioOff { id: StreamId },
    ClientJoined { user: Value, attributes: Value },
    ClientLeft { user: Value, attributes: Value },
    ClientId(ClientId),
    CustomMessage(Value),
    /// Transport-level connect failure, optional reason.
    ConnectFailed(Option<String>),
    /// Generic transport error, optional reason.
    Error(Option<String>),
    /// Media connectivity to the server was lost.
    ConnectivityLost,
    /// The transport connection went away.
    Disconnected,
}

#[derive(Deserialize)]
struct StreamRef {
    id: StreamId,
}

#[derive(Deserialize)]
struct StreamAnnouncement {
    id: StreamId,
    #[serde(default)]
    audio: bool,
    #[serde(default)]
    video: bool,
    #[serde(default)]
    screen: bool,
    #[serde(default)]
    attributes: Option<Attributes>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayPayload {
    #[serde(default)]
    peer_id: Option<StreamId>,
    #[serde(default)]
    stream_id: Option<StreamId>,
    #[serde(alias = "mess", alias = "msg")]
    message: Value,
}

#[derive(Deserialize)]
struct ParticipantPayload {
    #[serde(default)]
    user: Value,
    #[serde(default)]
    attr: Value,
}

#[derive(Deserialize)]
struct CustomPayload {
    msg: Value,
}

fn decode<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::Malformed {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

fn reason(payload: Value) -> Option<String> {
    match payload {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl ServerEvent {
    /// Decode a named push event.
    pub fn from_wire(name: &str, payload: Value) -> Result<Self, ProtocolError> {
        let event = match name {
            "stream-added" => {
                let a: StreamAnnouncement = decode(name, payload)?;
                ServerEvent::StreamAdded {
                    id: a.id,
                    capabilities: Capabilities {
                        audio: a.audio,
                        video: a.video,
                        screen: a.screen,
                    },
                    attributes: a.attributes.unwrap_or_default(),
                }
            }
            "stream-removed" => ServerEvent::StreamRemoved {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "signaling-relay" => {
                let relay: RelayPayload = decode(name, payload)?;
                if relay.peer_id.is_none() && relay.stream_id.is_none() {
                    return Err(ProtocolError::Malformed {
                        event: name.to_string(),
                        reason: "neither peerId nor streamId present".to_string(),
                    });
                }
                ServerEvent::SignalingRelay {
                    peer_id: relay.peer_id,
                    stream_id: relay.stream_id,
                    message: relay.message,
                }
            }
            "publish-ack" => ServerEvent::PublishAck {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "video-hold" => ServerEvent::VideoHold {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "video-ready" => ServerEvent::VideoReady {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "audio-hold" => ServerEvent::AudioHold {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "audio-ready" => ServerEvent::AudioReady {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "all-audio-hold" => ServerEvent::AllAudioHold,
            "all-audio-ready" => ServerEvent::AllAudioReady,
            "video-on" => ServerEvent::VideoOn {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "video-off" => ServerEvent::VideoOff {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "audio-on" => ServerEvent::AudioOn {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "audio-off" => ServerEvent::AudioOff {
                id: decode::<StreamRef>(name, payload)?.id,
            },
            "client-joined" => {
                let p: ParticipantPayload = decode(name, payload)?;
                ServerEvent::ClientJoined {
                    user: p.user,
                    attributes: p.attr,
                }
            }
            "client-left" => {
                let p: ParticipantPayload = decode(name, payload)?;
                ServerEvent::ClientLeft {
                    user: p.user,
                    attributes: p.attr,
                }
            }
            "client-id" => ServerEvent::ClientId(decode(name, payload)?),
            "custom-message" => ServerEvent::CustomMessage(decode::<CustomPayload>(name, payload)?.msg),
            "connect-failed" => ServerEvent::ConnectFailed(reason(payload)),
            "error" => ServerEvent::Error(reason(payload)),
            "connectivity-lost" => ServerEvent::ConnectivityLost,
            "disconnected" => ServerEvent::Disconnected,
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

/// How a published stream's media reaches the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishSource {
    /// The server pulls media from this URL.
    Url(String),
    /// Media is negotiated over a peer connection.
    Live,
}

/// Play/pause controls exposed by a ready stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    PlayAudio,
    PauseAudio,
    PlayVideo,
    PauseVideo,
}

/// Control actions as named on the wire.
///
/// Local streams control the outbound direction (`*-out-*`), remote
/// streams the inbound one (`*-in-*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    AudioOutOn,
    AudioOutOff,
    VideoOutOn,
    VideoOutOff,
    AudioInOn,
    AudioInOff,
    VideoInOn,
    VideoInOff,
}

impl ControlAction {
    #[must_use]
    pub fn for_signal(origin: Origin, signal: ControlSignal) -> Self {
        match (origin, signal) {
            (Origin::Local, ControlSignal::PlayAudio) => ControlAction::AudioOutOn,
            (Origin::Local, ControlSignal::PauseAudio) => ControlAction::AudioOutOff,
            (Origin::Local, ControlSignal::PlayVideo) => ControlAction::VideoOutOn,
            (Origin::Local, ControlSignal::PauseVideo) => ControlAction::VideoOutOff,
            (Origin::Remote, ControlSignal::PlayAudio) => ControlAction::AudioInOn,
            (Origin::Remote, ControlSignal::PauseAudio) => ControlAction::AudioInOff,
            (Origin::Remote, ControlSignal::PlayVideo) => ControlAction::VideoInOn,
            (Origin::Remote, ControlSignal::PauseVideo) => ControlAction::VideoInOff,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ControlAction::AudioOutOn => "audio-out-on",
            ControlAction::AudioOutOff => "audio-out-off",
            ControlAction::VideoOutOn => "video-out-on",
            ControlAction::VideoOutOff => "video-out-off",
            ControlAction::AudioInOn => "audio-in-on",
            ControlAction::AudioInOff => "audio-in-off",
            ControlAction::VideoInOn => "video-in-on",
            ControlAction::VideoInOff => "video-in-off",
        }
    }
}

/// Client-to-server messages.
#[derive(Debug)]
pub enum SignalingRequest {
    /// Authentication, first message after the transport opens.
    Token { token: SecretString },
    Publish {
        source: PublishSource,
        audio: bool,
        video: bool,
        attributes: Attributes,
    },
    Unpublish { stream_id: StreamId },
    Subscribe {
        stream_id: StreamId,
        audio: bool,
        video: bool,
        profile: String,
    },
    Unsubscribe { stream_id: StreamId },
    /// Outbound negotiation message (SDP or ICE candidate).
    SignalingMessage {
        stream_id: StreamId,
        message: Value,
        profile: Option<String>,
    },
    CustomMessage(Value),
}

impl SignalingRequest {
    /// Control message for a stream, sent as a custom message.
    #[must_use]
    pub fn control(action: ControlAction, stream_id: &StreamId) -> Self {
        SignalingRequest::CustomMessage(json!({
            "type": "control",
            "payload": {
                "action": action.as_str(),
                "streamId": stream_id.as_str(),
            }
        }))
    }

    /// Message type on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SignalingRequest::Token { .. } => "token",
            SignalingRequest::Publish { .. } => "publish",
            SignalingRequest::Unpublish { .. } => "unpublish",
            SignalingRequest::Subscribe { .. } => "subscribe",
            SignalingRequest::Unsubscribe { .. } => "unsubscribe",
            SignalingRequest::SignalingMessage { .. } => "signaling_message",
            SignalingRequest::CustomMessage(_) => "customMessage",
        }
    }

    /// Encoded payload. This is the only place the session token is exposed.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            SignalingRequest::Token { token } => json!({ "token": token.expose_secret() }),
            SignalingRequest::Publish {
                source,
                audio,
                video,
                attributes,
            } => match source {
                PublishSource::Url(url) => json!({
                    "state": "url",
                    "url": url,
                    "audio": audio,
                    "video": video,
                    "attributes": attributes,
                }),
                PublishSource::Live => json!({
                    "state": "live",
                    "audio": audio,
                    "video": video,
                    "attributes": attributes,
                }),
            },
            SignalingRequest::Unpublish { stream_id } | SignalingRequest::Unsubscribe { stream_id } => {
                json!(stream_id.as_str())
            }
            SignalingRequest::Subscribe {
                stream_id,
                audio,
                video,
                profile,
            } => json!({
                "streamId": stream_id.as_str(),
                "audio": audio,
                "video": video,
                "profile": profile,
            }),
            SignalingRequest::SignalingMessage {
                stream_id,
                message,
                profile,
            } => match profile {
                Some(profile) => json!({
                    "streamId": stream_id.as_str(),
                    "msg": message,
                    "profile": profile,
                }),
                None => json!({
                    "streamId": stream_id.as_str(),
                    "msg": message,
                }),
            },
            SignalingRequest::CustomMessage(message) => message.clone(),
        }
    }
}

/// Session parameters returned by a successful `token` request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    #[serde(default)]
    pub stun_server_url: Option<String>,
    #[serde(default)]
    pub turn_server: Option<Value>,
    #[serde(default, rename = "defaultVideoBW")]
    pub default_video_bandwidth: Option<u32>,
    #[serde(default, rename = "maxVideoBW")]
    pub max_video_bandwidth: Option<u32>,
}

impl ConnectResponse {
    /// Decode the response; an empty response carries no session parameters.
    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        if payload.is_null() {
            return Ok(Self::default());
        }
        decode("token", payload)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PublishPayload {
    Info { id: StreamId },
    Bare(StreamId),
}

/// Response to a `publish` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResponse {
    pub id: StreamId,
}

impl PublishResponse {
    /// Accepts either `{"id": ..}` or a bare id.
    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        let id = match decode::<PublishPayload>("publish", payload)? {
            PublishPayload::Info { id } | PublishPayload::Bare(id) => id,
        };
        Ok(Self { id })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_added_decodes_capabilities_and_attributes() {
        let event = ServerEvent::from_wire(
            "stream-added",
            json!({"id": 1177, "audio": true, "video": false, "attributes": {"room": "42"}}),
        )
        .unwrap();

        assert_eq!(
            event,
            ServerEvent::StreamAdded {
                id: StreamId::new("1177"),
                capabilities: Capabilities {
                    audio: true,
                    video: false,
                    screen: false,
                },
                attributes: Attributes::from([("room".to_string(), json!("42"))]),
            }
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = ServerEvent::from_wire("onMystery", json!({}));
        assert_eq!(
            result,
            Err(ProtocolError::UnknownEvent("onMystery".to_string()))
        );
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let result = ServerEvent::from_wire("stream-removed", json!({}));
        assert!(matches!(result, Err(ProtocolError::Malformed { event, .. }) if event == "stream-removed"));
    }

    #[test]
    fn test_relay_requires_an_address() {
        let result = ServerEvent::from_wire("signaling-relay", json!({"mess": {"type": "answer"}}));
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));

        let event = ServerEvent::from_wire(
            "signaling-relay",
            json!({"peerId": "9", "mess": {"type": "answer"}}),
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::SignalingRelay {
                peer_id: Some(StreamId::new("9")),
                stream_id: None,
                message: json!({"type": "answer"}),
            }
        );
    }

    #[test]
    fn test_connect_failed_reason_is_optional() {
        assert_eq!(
            ServerEvent::from_wire("connect-failed", Value::Null).unwrap(),
            ServerEvent::ConnectFailed(None)
        );
        assert_eq!(
            ServerEvent::from_wire("error", json!("handshake refused")).unwrap(),
            ServerEvent::Error(Some("handshake refused".to_string()))
        );
    }

    #[test]
    fn test_control_actions_by_origin() {
        assert_eq!(
            ControlAction::for_signal(Origin::Local, ControlSignal::PauseVideo).as_str(),
            "video-out-off"
        );
        assert_eq!(
            ControlAction::for_signal(Origin::Remote, ControlSignal::PlayAudio).as_str(),
            "audio-in-on"
        );
    }

    #[test]
    fn test_control_request_payload() {
        let request = SignalingRequest::control(ControlAction::AudioInOff, &StreamId::new("31"));

        assert_eq!(request.name(), "customMessage");
        assert_eq!(
            request.payload(),
            json!({"type": "control", "payload": {"action": "audio-in-off", "streamId": "31"}})
        );
    }

    #[test]
    fn test_token_request_exposes_token_only_in_payload() {
        let request = SignalingRequest::Token {
            token: SecretString::from("tok-1234".to_string()),
        };

        assert!(!format!("{request:?}").contains("tok-1234"));
        assert_eq!(request.payload(), json!({"token": "tok-1234"}));
    }

    #[test]
    fn test_connect_response_fields() {
        let response = ConnectResponse::from_payload(json!({
            "stunServerUrl": "stun:stun.example:3478",
            "defaultVideoBW": 300,
            "maxVideoBW": 500
        }))
        .unwrap();

        assert_eq!(
            response.stun_server_url.as_deref(),
            Some("stun:stun.example:3478")
        );
        assert_eq!(response.default_video_bandwidth, Some(300));
        assert_eq!(response.max_video_bandwidth, Some(500));
        assert_eq!(response.turn_server, None);

        assert_eq!(
            ConnectResponse::from_payload(Value::Null).unwrap(),
            ConnectResponse::default()
        );
    }

    #[test]
    fn test_publish_response_shapes() {
        assert_eq!(
            PublishResponse::from_payload(json!({"id": 88})).unwrap().id,
            StreamId::new("88")
        );
        assert_eq!(
            PublishResponse::from_payload(json!("88")).unwrap().id,
            StreamId::new("88")
        );
        assert!(PublishResponse::from_payload(json!({"ok": true})).is_err());
    }
}
