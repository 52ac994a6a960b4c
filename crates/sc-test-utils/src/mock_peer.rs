//! Mock peer connections.
//!
//! [`MockPeerFactory`] records every connection it creates. Tests drive a
//! connection through its [`MockPeerHandle`]: report connectivity, deliver
//! inbound media, emit outbound signaling, and inspect what the session did
//! to it (offers, applied messages, close).

use crate::fixtures::media;
use serde_json::Value;
use session_client::peer::{
    ConnectivityState, PeerConnection, PeerConnectionConfig, PeerConnectionFactory, PeerError,
    PeerEventSink,
};
use session_client::stream::{MediaHandle, Origin};
use common::types::StreamId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long `wait_for_peer` waits before failing the test.
pub const PEER_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct PeerRecord {
    attached: Vec<String>,
    offers: Vec<bool>,
    messages: Vec<Value>,
    closed: bool,
}

/// Test-side view of one created connection.
#[derive(Debug)]
pub struct MockPeerState {
    config: PeerConnectionConfig,
    sink: PeerEventSink,
    record: Mutex<PeerRecord>,
}

pub type MockPeerHandle = Arc<MockPeerState>;

impl MockPeerState {
    #[must_use]
    pub fn config(&self) -> &PeerConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.sink.stream_id().clone()
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.sink.origin()
    }

    /// Report a connectivity change as the engine would.
    pub fn connectivity(&self, state: ConnectivityState) {
        self.sink.connectivity_changed(state);
    }

    /// Deliver inbound media with the given source id.
    pub fn media_arrived(&self, id: &str) {
        self.sink.media_arrived(media(id));
    }

    /// Emit an outbound negotiation message.
    pub fn signal(&self, message: Value) {
        self.sink.signaling(message);
    }

    /// `receive_only` flag of every offer, in order.
    #[must_use]
    pub fn offers(&self) -> Vec<bool> {
        self.record.lock().unwrap().offers.clone()
    }

    /// Ids of attached local media.
    #[must_use]
    pub fn attached(&self) -> Vec<String> {
        self.record.lock().unwrap().attached.clone()
    }

    /// Negotiation messages the session applied.
    #[must_use]
    pub fn processed_messages(&self) -> Vec<Value> {
        self.record.lock().unwrap().messages.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.record.lock().unwrap().closed
    }
}

struct MockPeer {
    state: MockPeerHandle,
    fail_offer: bool,
}

impl PeerConnection for MockPeer {
    fn attach_local_media(&mut self, media: MediaHandle) -> Result<(), PeerError> {
        let mut record = self.state.record.lock().unwrap();
        if record.closed {
            return Err(PeerError::Closed);
        }
        record.attached.push(media.id().to_string());
        Ok(())
    }

    fn create_offer(&mut self, receive_only: bool) -> Result<(), PeerError> {
        if self.fail_offer {
            return Err(PeerError::Engine("offer rejected by engine".to_string()));
        }
        let mut record = self.state.record.lock().unwrap();
        if record.closed {
            return Err(PeerError::Closed);
        }
        record.offers.push(receive_only);
        Ok(())
    }

    fn process_signaling_message(&mut self, message: &Value) -> Result<(), PeerError> {
        let mut record = self.state.record.lock().unwrap();
        if record.closed {
            return Err(PeerError::Closed);
        }
        record.messages.push(message.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.state.record.lock().unwrap().closed = true;
    }
}

/// Factory for [`MockPeer`] connections.
#[derive(Debug, Default)]
pub struct MockPeerFactory {
    peers: Mutex<Vec<MockPeerHandle>>,
    fail_create: AtomicBool,
    fail_offer: AtomicBool,
}

impl MockPeerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail.
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `create_offer` fail on connections created from now on.
    pub fn fail_offer(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    /// Every connection created so far, in creation order.
    #[must_use]
    pub fn peers(&self) -> Vec<MockPeerHandle> {
        self.peers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Wait until the `index`-th connection exists.
    ///
    /// # Panics
    ///
    /// Panics if it does not appear within [`PEER_WAIT`].
    pub async fn wait_for_peer(&self, index: usize) -> MockPeerHandle {
        let wait = async {
            loop {
                if let Some(peer) = self.peers.lock().unwrap().get(index) {
                    return Arc::clone(peer);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(PEER_WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("peer connection {index} was never created"))
    }
}

impl PeerConnectionFactory for MockPeerFactory {
    fn create(
        &self,
        config: PeerConnectionConfig,
        sink: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, PeerError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PeerError::Engine("engine unavailable".to_string()));
        }
        let state = Arc::new(MockPeerState {
            config,
            sink,
            record: Mutex::new(PeerRecord::default()),
        });
        self.peers.lock().unwrap().push(Arc::clone(&state));
        Ok(Box::new(MockPeer {
            state,
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
        }))
    }
}
