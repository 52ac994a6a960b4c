//! Mock signaling channel.
//!
//! An in-memory [`SignalingChannel`] that:
//! - Answers requests with sensible defaults (`publish` yields increasing ids)
//! - Lets a test reject, override or hold individual request types
//! - Records every request and notification in arrival order
//! - Lets the test push server events
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_test_utils::MockSignalingChannel;
//!
//! let channel = MockSignalingChannel::new();
//! channel.reject("subscribe", "no such stream");
//! channel.hold("publish");
//! // ... start a publish, then:
//! channel.release("publish");
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use session_client::signaling::{ChannelError, SignalingChannel, SignalingRequest, WireEvent};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, Notify};

/// First id handed out for `publish` requests.
pub const FIRST_PUBLISHED_ID: u64 = 100;

/// Custom answer for a request. `None` falls back to the defaults.
pub type Responder =
    Box<dyn Fn(&SignalingRequest) -> Option<Result<Value, ChannelError>> + Send + Sync>;

/// A recorded outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub name: String,
    pub payload: Value,
}

#[derive(Default)]
struct Recorded {
    requests: Vec<Sent>,
    notifications: Vec<Sent>,
    opened: Vec<(String, bool)>,
}

/// In-memory signaling channel for tests.
pub struct MockSignalingChannel {
    recorded: Mutex<Recorded>,
    rejections: Mutex<HashMap<String, ChannelError>>,
    held: Mutex<HashSet<String>>,
    released: Notify,
    responder: Mutex<Option<Responder>>,
    open_error: Mutex<Option<ChannelError>>,
    events_tx: mpsc::UnboundedSender<WireEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WireEvent>>>,
    next_id: AtomicU64,
    closes: AtomicUsize,
    connect_response: Mutex<Value>,
}

impl Default for MockSignalingChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSignalingChannel {
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            recorded: Mutex::new(Recorded::default()),
            rejections: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
            released: Notify::new(),
            responder: Mutex::new(None),
            open_error: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            next_id: AtomicU64::new(FIRST_PUBLISHED_ID),
            closes: AtomicUsize::new(0),
            connect_response: Mutex::new(json!({
                "stunServerUrl": "stun:stun.sessions.example:3478",
                "defaultVideoBW": 300,
                "maxVideoBW": 1000,
            })),
        }
    }

    /// Answer every request of this type with a server error.
    pub fn reject(&self, name: &str, reason: &str) {
        self.fail(name, ChannelError::Rejected(reason.to_string()));
    }

    /// Answer every request of this type with `error`.
    pub fn fail(&self, name: &str, error: ChannelError) {
        self.rejections
            .lock()
            .unwrap()
            .insert(name.to_string(), error);
    }

    /// Answer requests of this type normally again.
    pub fn accept(&self, name: &str) {
        self.rejections.lock().unwrap().remove(name);
    }

    /// Make `open` fail until cleared with `None`.
    pub fn set_open_error(&self, error: Option<ChannelError>) {
        *self.open_error.lock().unwrap() = error;
    }

    /// Replace the `token` response payload.
    pub fn set_connect_response(&self, payload: Value) {
        *self.connect_response.lock().unwrap() = payload;
    }

    /// Install a custom responder, consulted before the defaults.
    pub fn respond_with(
        &self,
        responder: impl Fn(&SignalingRequest) -> Option<Result<Value, ChannelError>>
            + Send
            + Sync
            + 'static,
    ) {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Keep requests of this type pending until [`release`](Self::release).
    pub fn hold(&self, name: &str) {
        self.held.lock().unwrap().insert(name.to_string());
    }

    pub fn release(&self, name: &str) {
        self.held.lock().unwrap().remove(name);
        self.released.notify_waiters();
    }

    /// Push a server event.
    pub fn push(&self, name: &str, payload: Value) {
        // Receiver gone means the session is gone; nothing to deliver to.
        let _ = self.events_tx.send(WireEvent::new(name, payload));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<Sent> {
        self.recorded.lock().unwrap().requests.clone()
    }

    /// Recorded requests of one type.
    #[must_use]
    pub fn requests_named(&self, name: &str) -> Vec<Sent> {
        self.requests()
            .into_iter()
            .filter(|sent| sent.name == name)
            .collect()
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Sent> {
        self.recorded.lock().unwrap().notifications.clone()
    }

    #[must_use]
    pub fn notifications_named(&self, name: &str) -> Vec<Sent> {
        self.notifications()
            .into_iter()
            .filter(|sent| sent.name == name)
            .collect()
    }

    /// Every `open` call as `(host, secure)`.
    #[must_use]
    pub fn opened(&self) -> Vec<(String, bool)> {
        self.recorded.lock().unwrap().opened.clone()
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn is_held(&self, name: &str) -> bool {
        self.held.lock().unwrap().contains(name)
    }

    fn answer(&self, request: &SignalingRequest) -> Result<Value, ChannelError> {
        if let Some(error) = self.rejections.lock().unwrap().get(request.name()) {
            return Err(error.clone());
        }
        if let Some(responder) = self.responder.lock().unwrap().as_ref() {
            if let Some(answer) = responder(request) {
                return answer;
            }
        }
        Ok(match request {
            SignalingRequest::Token { .. } => self.connect_response.lock().unwrap().clone(),
            SignalingRequest::Publish { .. } => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                json!({ "id": id })
            }
            _ => Value::Null,
        })
    }
}

#[async_trait]
impl SignalingChannel for MockSignalingChannel {
    async fn open(&self, host: &str, secure: bool) -> Result<(), ChannelError> {
        self.recorded
            .lock()
            .unwrap()
            .opened
            .push((host.to_string(), secure));
        match self.open_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn request(&self, request: SignalingRequest) -> Result<Value, ChannelError> {
        let name = request.name();
        self.recorded.lock().unwrap().requests.push(Sent {
            name: name.to_string(),
            payload: request.payload(),
        });

        loop {
            let released = self.released.notified();
            if !self.is_held(name) {
                break;
            }
            released.await;
        }

        self.answer(&request)
    }

    async fn notify(&self, request: SignalingRequest) -> Result<(), ChannelError> {
        self.recorded.lock().unwrap().notifications.push(Sent {
            name: request.name().to_string(),
            payload: request.payload(),
        });
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<WireEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::StreamId;

    fn unpublish(id: &str) -> SignalingRequest {
        SignalingRequest::Unpublish {
            stream_id: StreamId::new(id),
        }
    }

    #[tokio::test]
    async fn test_default_answers() {
        let channel = MockSignalingChannel::new();

        let first = channel
            .request(SignalingRequest::Publish {
                source: session_client::signaling::PublishSource::Live,
                audio: true,
                video: false,
                attributes: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(first, json!({ "id": FIRST_PUBLISHED_ID }));
        assert_eq!(channel.request(unpublish("1")).await.unwrap(), Value::Null);
        assert_eq!(channel.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_reject_and_accept() {
        let channel = MockSignalingChannel::new();
        channel.reject("unpublish", "not yours");

        assert_eq!(
            channel.request(unpublish("1")).await,
            Err(ChannelError::Rejected("not yours".to_string()))
        );

        channel.accept("unpublish");
        assert!(channel.request(unpublish("1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_hold_and_release() {
        let channel = std::sync::Arc::new(MockSignalingChannel::new());
        channel.hold("unpublish");

        let pending = {
            let channel = std::sync::Arc::clone(&channel);
            tokio::spawn(async move { channel.request(unpublish("1")).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        channel.release("unpublish");
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let channel = MockSignalingChannel::new();
        let mut events = channel.take_events().unwrap();
        assert!(channel.take_events().is_none());

        channel.push("disconnected", Value::Null);
        assert_eq!(events.recv().await.unwrap().name, "disconnected");
    }
}
