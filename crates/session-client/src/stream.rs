//! Stream model.
//!
//! A [`LocalStream`] is what the caller hands to `publish`. Once the server
//! assigns it an id it becomes a registered [`Stream`], as does every remote
//! stream the server announces. Callers never hold a `Stream`; they observe
//! [`StreamInfo`] snapshots.

use crate::actors::FlowId;
use crate::peer::PeerConnection;
use common::types::{LocalStreamKey, StreamId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Opaque publisher-supplied key/value mapping.
pub type Attributes = BTreeMap<String, Value>;

/// Which registry a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

impl Origin {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Remote => "remote",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

impl Capabilities {
    /// True when at least one of audio, video or screen is present.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.audio || self.video || self.screen
    }
}

/// A media source owned outside this crate (capture device, decoder
/// output, inbound track set).
pub trait MediaSource: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
}

pub type MediaHandle = Arc<dyn MediaSource>;

/// Where a local stream's media comes from.
#[derive(Debug, Clone)]
pub enum LocalSource {
    /// Live media negotiated over a peer connection.
    Live(MediaHandle),
    /// Media the server pulls from a URL.
    Url(String),
    /// Not acquired yet. Publishing fails.
    Unavailable,
}

/// A caller-owned stream that can be published.
#[derive(Debug, Clone)]
pub struct LocalStream {
    pub key: LocalStreamKey,
    pub capabilities: Capabilities,
    pub attributes: Attributes,
    pub source: LocalSource,
    /// Requested video bandwidth (kbps). Falls back to the session default.
    pub max_video_bandwidth: Option<u32>,
    /// Requested audio bandwidth (kbps).
    pub max_audio_bandwidth: Option<u32>,
}

impl LocalStream {
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            key: LocalStreamKey::new(),
            capabilities,
            attributes: Attributes::new(),
            source: LocalSource::Unavailable,
            max_video_bandwidth: None,
            max_audio_bandwidth: None,
        }
    }

    #[must_use]
    pub fn with_media(mut self, media: MediaHandle) -> Self {
        self.source = LocalSource::Live(media);
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source = LocalSource::Url(url.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_max_video_bandwidth(mut self, kbps: u32) -> Self {
        self.max_video_bandwidth = Some(kbps);
        self
    }

    #[must_use]
    pub fn with_max_audio_bandwidth(mut self, kbps: u32) -> Self {
        self.max_audio_bandwidth = Some(kbps);
        self
    }
}

/// Negotiation progress of a registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// No active negotiation.
    Idle,
    /// A peer connection exists and has not reached the ready state.
    Negotiating,
    /// Media is flowing (or the server pulls it from a URL).
    Ready,
}

/// The active negotiation of a stream: the peer connection plus the flow
/// that owns it.
pub struct Negotiation {
    pub flow: FlowId,
    pub peer: Box<dyn PeerConnection>,
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

/// A registered stream.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    pub origin: Origin,
    pub capabilities: Capabilities,
    pub attributes: Attributes,
    /// Local capture source, or the inbound media once a subscription
    /// delivered it.
    pub media: Option<MediaHandle>,
    pub url: Option<String>,
    /// Client-side key; set for local streams only.
    pub local_key: Option<LocalStreamKey>,
    /// At most one active negotiation.
    pub negotiation: Option<Negotiation>,
    pub status: StreamStatus,
    /// Play/pause controls are available.
    pub controls_wired: bool,
    /// `close_stream` unpublishes this stream.
    pub close_hook: bool,
}

impl Stream {
    /// A stream announced by the server.
    #[must_use]
    pub fn remote(id: StreamId, capabilities: Capabilities, attributes: Attributes) -> Self {
        Self {
            id,
            origin: Origin::Remote,
            capabilities,
            attributes,
            media: None,
            url: None,
            local_key: None,
            negotiation: None,
            status: StreamStatus::Idle,
            controls_wired: false,
            close_hook: false,
        }
    }

    /// A local stream under its server-assigned id.
    #[must_use]
    pub fn local(id: StreamId, local: &LocalStream) -> Self {
        let (media, url) = match &local.source {
            LocalSource::Live(media) => (Some(Arc::clone(media)), None),
            LocalSource::Url(url) => (None, Some(url.clone())),
            LocalSource::Unavailable => (None, None),
        };
        Self {
            id,
            origin: Origin::Local,
            capabilities: local.capabilities,
            attributes: local.attributes.clone(),
            media,
            url,
            local_key: Some(local.key),
            negotiation: None,
            status: StreamStatus::Idle,
            controls_wired: false,
            close_hook: false,
        }
    }

    /// The flow currently negotiating this stream, if any.
    #[must_use]
    pub fn flow(&self) -> Option<FlowId> {
        self.negotiation.as_ref().map(|n| n.flow)
    }

    /// Close and drop the negotiation, unwire controls and drop inbound
    /// media. Returns the flow that owned the negotiation.
    pub fn detach(&mut self) -> Option<FlowId> {
        let flow = self.negotiation.take().map(|mut negotiation| {
            negotiation.peer.close();
            negotiation.flow
        });
        if self.origin == Origin::Remote {
            self.media = None;
        }
        self.controls_wired = false;
        self.status = StreamStatus::Idle;
        flow
    }

    #[must_use]
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.id.clone(),
            origin: self.origin,
            capabilities: self.capabilities,
            attributes: self.attributes.clone(),
            url: self.url.clone(),
            status: self.status,
            has_media: self.media.is_some(),
            controls_wired: self.controls_wired,
        }
    }
}

/// Read-only snapshot of a registered stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub id: StreamId,
    pub origin: Origin,
    pub capabilities: Capabilities,
    pub attributes: Attributes,
    pub url: Option<String>,
    pub status: StreamStatus,
    pub has_media: bool,
    pub controls_wired: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Camera;

    impl MediaSource for Camera {
        fn id(&self) -> &str {
            "camera-0"
        }
    }

    #[test]
    fn test_capabilities_any() {
        assert!(!Capabilities::default().any());
        assert!(Capabilities {
            screen: true,
            ..Capabilities::default()
        }
        .any());
    }

    #[test]
    fn test_local_stream_keeps_key_and_source() {
        let local = LocalStream::new(Capabilities {
            audio: true,
            video: true,
            screen: false,
        })
        .with_media(Arc::new(Camera))
        .with_attribute("name", json!("alice"));

        let stream = Stream::local(StreamId::new("5"), &local);

        assert_eq!(stream.local_key, Some(local.key));
        assert_eq!(stream.origin, Origin::Local);
        assert_eq!(stream.media.as_ref().map(|m| m.id().to_string()), Some("camera-0".to_string()));
        assert_eq!(stream.url, None);
        assert_eq!(stream.attributes.get("name"), Some(&json!("alice")));
    }

    #[test]
    fn test_url_stream_has_no_media() {
        let local = LocalStream::new(Capabilities {
            video: true,
            ..Capabilities::default()
        })
        .with_url("rtsp://cams.example/lobby");

        let info = Stream::local(StreamId::new("6"), &local).info();

        assert!(!info.has_media);
        assert_eq!(info.url.as_deref(), Some("rtsp://cams.example/lobby"));
        assert_eq!(info.status, StreamStatus::Idle);
    }

    #[test]
    fn test_detach_without_negotiation_resets_remote() {
        let mut stream = Stream::remote(
            StreamId::new("7"),
            Capabilities {
                audio: true,
                ..Capabilities::default()
            },
            Attributes::new(),
        );
        stream.media = Some(Arc::new(Camera));
        stream.controls_wired = true;
        stream.status = StreamStatus::Ready;

        assert_eq!(stream.detach(), None);
        assert!(stream.media.is_none());
        assert!(!stream.controls_wired);
        assert_eq!(stream.status, StreamStatus::Idle);
    }
}
