//! Pre-configured test data fixtures for session client testing.
//!
//! Provides builders and test data for:
//! - Credentials and client configuration
//! - Local streams (live camera, audio only, URL)
//! - Server event payloads
//! - A connected session harness with an event tap

use crate::mock_peer::MockPeerFactory;
use crate::mock_signaling::MockSignalingChannel;
use serde_json::{json, Value};
use session_client::stream::{MediaHandle, MediaSource};
use session_client::{
    Capabilities, ClientConfig, ClientError, ClientEvent, Credentials, LocalStream,
    SessionClientHandle,
};
use common::types::StreamId;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Negotiation profile used by [`test_config`].
pub const TEST_PROFILE: &str = "test-profile";

/// How long event helpers wait before failing the test.
pub const EVENT_WAIT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per test binary.
///
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=sc.flow=debug`. Silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "off".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Media source stand-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMedia {
    pub id: String,
}

impl MediaSource for TestMedia {
    fn id(&self) -> &str {
        &self.id
    }
}

#[must_use]
pub fn media(id: &str) -> MediaHandle {
    Arc::new(TestMedia { id: id.to_string() })
}

#[must_use]
pub fn credentials() -> Credentials {
    Credentials::new("sessions.example:8443", true, "test-session-token")
}

/// Config with a short control retry interval.
#[must_use]
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(TEST_PROFILE);
    config.control_retry_interval = Duration::from_millis(20);
    config.control_retry_limit = 5;
    config.instance_id = format!("sc-test-{}", uuid::Uuid::new_v4());
    config
}

#[must_use]
pub fn audio_video() -> Capabilities {
    Capabilities {
        audio: true,
        video: true,
        screen: false,
    }
}

/// Live audio/video stream with captured media.
#[must_use]
pub fn camera_stream() -> LocalStream {
    LocalStream::new(audio_video()).with_media(media("camera"))
}

#[must_use]
pub fn audio_only_stream() -> LocalStream {
    LocalStream::new(Capabilities {
        audio: true,
        video: false,
        screen: false,
    })
    .with_media(media("microphone"))
}

/// Stream the server pulls from `url`.
#[must_use]
pub fn url_stream(url: &str) -> LocalStream {
    LocalStream::new(audio_video()).with_url(url)
}

/// `stream-added` payload.
#[must_use]
pub fn stream_added_payload(id: &str, audio: bool, video: bool) -> Value {
    json!({
        "id": id,
        "audio": audio,
        "video": video,
        "screen": false,
        "attributes": {},
    })
}

/// `stream-added` payload with attributes.
#[must_use]
pub fn stream_added_with_attributes(id: &str, attributes: Value) -> Value {
    json!({
        "id": id,
        "audio": true,
        "video": true,
        "attributes": attributes,
    })
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// Panics if it does not hold within [`EVENT_WAIT`].
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(EVENT_WAIT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

/// A session client wired to mocks, with an event receiver taken at spawn.
pub struct TestSession {
    pub handle: SessionClientHandle,
    pub channel: Arc<MockSignalingChannel>,
    pub peers: Arc<MockPeerFactory>,
    pub events: broadcast::Receiver<ClientEvent>,
}

impl TestSession {
    /// Spawn a disconnected session client.
    #[must_use]
    pub fn start() -> Self {
        Self::start_with(test_config())
    }

    #[must_use]
    pub fn start_with(config: ClientConfig) -> Self {
        init_tracing();
        let channel = Arc::new(MockSignalingChannel::new());
        let peers = Arc::new(MockPeerFactory::new());
        let handle = SessionClientHandle::spawn(config, channel.clone(), peers.clone());
        let events = handle.events();
        Self {
            handle,
            channel,
            peers,
            events,
        }
    }

    /// Spawn and connect, consuming the `client-connected` event.
    ///
    /// # Panics
    ///
    /// Panics if the connect fails.
    pub async fn connected() -> Self {
        let mut session = Self::start();
        session
            .handle
            .connect(credentials())
            .await
            .expect("connect should succeed");
        session.expect_event("client-connected").await;
        session
    }

    /// Next event, whatever it is.
    ///
    /// # Panics
    ///
    /// Panics if no event arrives within [`EVENT_WAIT`].
    pub async fn next_event(&mut self) -> ClientEvent {
        tokio::time::timeout(EVENT_WAIT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event bus closed or lagged")
    }

    /// Skip events until one named `name` arrives.
    ///
    /// # Panics
    ///
    /// Panics if none arrives within [`EVENT_WAIT`].
    pub async fn expect_event(&mut self, name: &str) -> ClientEvent {
        let wait = async {
            loop {
                let event = self.events.recv().await.expect("event bus closed or lagged");
                if event.name() == name {
                    return event;
                }
            }
        };
        tokio::time::timeout(EVENT_WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
    }

    /// Events already delivered, without waiting.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Announce a remote stream and wait for its `stream-added`.
    pub async fn announce(&mut self, id: &str) {
        self.channel
            .push("stream-added", stream_added_payload(id, true, true));
        self.expect_event("stream-added").await;
    }

    /// Start a publish in the background.
    #[must_use]
    pub fn spawn_publish(&self, stream: LocalStream) -> JoinHandle<Result<StreamId, ClientError>> {
        let handle = self.handle.clone();
        tokio::spawn(async move { handle.publish(stream).await })
    }

    /// Start a subscribe in the background.
    #[must_use]
    pub fn spawn_subscribe(&self, id: &str) -> JoinHandle<Result<(), ClientError>> {
        let handle = self.handle.clone();
        let id = StreamId::new(id);
        tokio::spawn(async move { handle.subscribe(&id).await })
    }

    /// Assert the registry and flow bookkeeping is consistent.
    ///
    /// # Panics
    ///
    /// Panics listing every violation.
    pub async fn assert_consistent(&self) {
        let violations = self
            .handle
            .check_invariants()
            .await
            .expect("session actor should answer");
        assert!(violations.is_empty(), "invariant violations: {violations:?}");
    }
}
