//! Tests for the publish flow.
//!
//! Covers:
//! - Argument and state validation
//! - Live publish: offer, signaling relay, connectivity ready/failed
//! - URL publish
//! - Exactly-once outcome per flow
//! - Unpublish and close through the close hook

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::StreamId;
use sc_test_utils::*;
use serde_json::json;
use session_client::peer::ConnectivityState;
use session_client::stream::{Capabilities, LocalStream, Origin, StreamStatus};
use session_client::{ClientError, ClientEvent};

/// Publish `stream` and bring its connection up. Returns the assigned id.
async fn publish_ready(session: &TestSession, stream: LocalStream, peer_index: usize) -> StreamId {
    let publish = session.spawn_publish(stream);
    let peer = session.peers.wait_for_peer(peer_index).await;
    peer.connectivity(ConnectivityState::Connected);
    publish.await.unwrap().unwrap()
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_publish_without_capabilities_is_invalid() {
    let session = TestSession::connected().await;
    let stream = LocalStream::new(Capabilities::default()).with_media(media("camera"));

    let result = session.handle.publish(stream).await;

    assert!(matches!(result, Err(ClientError::InvalidStream(_))));
    assert!(session.channel.requests_named("publish").is_empty());
}

#[tokio::test]
async fn test_publish_without_media_is_invalid() {
    let session = TestSession::connected().await;

    let result = session.handle.publish(LocalStream::new(audio_video())).await;

    assert!(matches!(
        result,
        Err(ClientError::InvalidStream(reason)) if reason == "stream access not ready"
    ));
}

#[tokio::test]
async fn test_publish_requires_connection() {
    let session = TestSession::start();

    let result = session.handle.publish(camera_stream()).await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_connection_is_checked_before_the_stream() {
    let session = TestSession::start();

    let result = session
        .handle
        .publish(LocalStream::new(Capabilities::default()))
        .await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_same_stream_cannot_be_published_twice() {
    let session = TestSession::connected().await;
    let stream = camera_stream();

    publish_ready(&session, stream.clone(), 0).await;
    let again = session.handle.publish(stream).await;

    assert!(matches!(
        again,
        Err(ClientError::InvalidStream(reason)) if reason == "stream already published"
    ));
}

// ============================================================================
// Live publish
// ============================================================================

#[tokio::test]
async fn test_live_publish_negotiates_and_resolves_with_id() {
    let mut session = TestSession::connected().await;

    let publish = session.spawn_publish(camera_stream().with_attribute("name", json!("cam")));
    let peer = session.peers.wait_for_peer(0).await;

    assert_eq!(peer.origin(), Origin::Local);
    assert_eq!(peer.stream_id(), StreamId::new(FIRST_PUBLISHED_ID.to_string()));
    assert_eq!(peer.attached(), vec!["camera".to_string()]);
    assert_eq!(peer.offers(), vec![false]);
    assert_eq!(peer.config().max_video_bandwidth, Some(300));

    let request = session.channel.requests_named("publish");
    assert_eq!(
        request.first().map(|sent| sent.payload.clone()),
        Some(json!({
            "state": "live",
            "audio": true,
            "video": true,
            "attributes": { "name": "cam" },
        }))
    );

    // Outbound offer goes to the server without a profile.
    peer.signal(json!({ "type": "offer", "sdp": "v=0" }));
    let channel = session.channel.clone();
    wait_until("offer relayed", || {
        !channel.notifications_named("signaling_message").is_empty()
    })
    .await;
    assert_eq!(
        session
            .channel
            .notifications_named("signaling_message")
            .first()
            .map(|sent| sent.payload.clone()),
        Some(json!({
            "streamId": "100",
            "msg": { "type": "offer", "sdp": "v=0" },
        }))
    );

    // Server answer is applied to the connection.
    session.channel.push(
        "signaling-relay",
        json!({ "streamId": "100", "mess": { "type": "answer", "sdp": "v=0" } }),
    );
    let answered = peer.clone();
    wait_until("answer applied", || !answered.processed_messages().is_empty()).await;

    peer.connectivity(ConnectivityState::Completed);
    let id = publish.await.unwrap().unwrap();
    assert_eq!(id, StreamId::new("100"));

    let info = session
        .handle
        .stream(Origin::Local, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.status, StreamStatus::Ready);
    assert!(info.controls_wired);
    assert!(info.has_media);

    session.channel.push("publish-ack", json!({ "id": "100" }));
    let published = session.expect_event("stream-published").await;
    assert_eq!(published.stream().map(|s| s.id.clone()), Some(id));
    session.assert_consistent().await;
}

#[tokio::test]
async fn test_requested_bandwidth_is_capped() {
    let session = TestSession::connected().await;
    let stream = camera_stream()
        .with_max_video_bandwidth(5000)
        .with_max_audio_bandwidth(64);

    let _publish = session.spawn_publish(stream);
    let peer = session.peers.wait_for_peer(0).await;

    assert_eq!(peer.config().max_video_bandwidth, Some(1000));
    assert_eq!(peer.config().max_audio_bandwidth, Some(64));
}

#[tokio::test]
async fn test_rejected_publish() {
    let session = TestSession::connected().await;
    session.channel.reject("publish", "quota exceeded");

    let result = session.handle.publish(camera_stream()).await;

    assert!(matches!(
        result,
        Err(ClientError::SignalingRejected(reason)) if reason == "quota exceeded"
    ));
    assert_eq!(session.peers.created(), 0);
    assert!(session.handle.local_streams().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_publish_answer_is_a_protocol_error() {
    let session = TestSession::connected().await;
    session.channel.respond_with(|request| {
        (request.name() == "publish").then(|| Ok(json!({ "stream": true })))
    });

    let result = session.handle.publish(camera_stream()).await;

    assert!(matches!(result, Err(ClientError::Protocol(_))));
}

#[tokio::test]
async fn test_connectivity_failure_unpublishes() {
    let session = TestSession::connected().await;

    let publish = session.spawn_publish(audio_only_stream());
    let peer = session.peers.wait_for_peer(0).await;
    peer.connectivity(ConnectivityState::Failed);

    assert!(matches!(
        publish.await.unwrap(),
        Err(ClientError::NegotiationFailed)
    ));
    assert!(peer.is_closed());
    assert!(session.handle.local_streams().await.unwrap().is_empty());

    let channel = session.channel.clone();
    wait_until("unpublish sent", || {
        !channel.notifications_named("unpublish").is_empty()
    })
    .await;
    assert_eq!(
        session
            .channel
            .notifications_named("unpublish")
            .first()
            .map(|sent| sent.payload.clone()),
        Some(json!("100"))
    );
    session.assert_consistent().await;
}

#[tokio::test]
async fn test_offer_failure_fails_publish() {
    let session = TestSession::connected().await;
    session.peers.fail_offer(true);

    let result = session.handle.publish(camera_stream()).await;

    assert!(matches!(result, Err(ClientError::NegotiationFailed)));
    let peer = session.peers.wait_for_peer(0).await;
    assert!(peer.is_closed());
    assert!(session.handle.local_streams().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_publish_outcome_is_reported_once() {
    let session = TestSession::connected().await;

    let publish = session.spawn_publish(camera_stream());
    let peer = session.peers.wait_for_peer(0).await;
    peer.connectivity(ConnectivityState::Connected);
    peer.connectivity(ConnectivityState::Failed);
    peer.connectivity(ConnectivityState::Connected);

    let id = publish.await.unwrap().unwrap();

    // A failure after ready does not tear the stream down.
    assert!(session
        .handle
        .stream(Origin::Local, &id)
        .await
        .unwrap()
        .is_some());
    assert!(session.channel.notifications_named("unpublish").is_empty());

    let flows = session.handle.metrics().flows.snapshot();
    assert_eq!(flows.ready, 1);
    assert_eq!(flows.failed, 0);
    session.assert_consistent().await;
}

// ============================================================================
// URL publish
// ============================================================================

#[tokio::test]
async fn test_url_publish_resolves_on_server_ack() {
    let session = TestSession::connected().await;

    let id = session
        .handle
        .publish(url_stream("rtsp://cameras.example/lobby"))
        .await
        .unwrap();

    assert_eq!(session.peers.created(), 0);
    let request = session.channel.requests_named("publish");
    let payload = request.first().map(|sent| sent.payload.clone()).unwrap();
    assert_eq!(payload.get("state"), Some(&json!("url")));
    assert_eq!(
        payload.get("url"),
        Some(&json!("rtsp://cameras.example/lobby"))
    );

    let info = session
        .handle
        .stream(Origin::Local, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.status, StreamStatus::Ready);
    assert_eq!(info.url.as_deref(), Some("rtsp://cameras.example/lobby"));
}

// ============================================================================
// Unpublish
// ============================================================================

#[tokio::test]
async fn test_unpublish_closes_connection() {
    let session = TestSession::connected().await;
    let id = publish_ready(&session, camera_stream(), 0).await;
    let peer = session.peers.wait_for_peer(0).await;

    session.handle.unpublish(&id).await.unwrap();

    assert!(peer.is_closed());
    assert!(session.handle.local_streams().await.unwrap().is_empty());
    assert_eq!(session.channel.requests_named("unpublish").len(), 1);

    // Reports from the closed connection are ignored.
    peer.connectivity(ConnectivityState::Failed);
    session.assert_consistent().await;
}

#[tokio::test]
async fn test_stream_can_be_republished_after_unpublish() {
    let session = TestSession::connected().await;
    let stream = camera_stream();
    let first = publish_ready(&session, stream.clone(), 0).await;
    session.handle.unpublish(&first).await.unwrap();

    let second = publish_ready(&session, stream, 1).await;

    assert_ne!(second, first);
    let local = session.handle.local_streams().await.unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local.first().map(|info| info.id.clone()), Some(second));
    session.assert_consistent().await;
}

#[tokio::test]
async fn test_unpublish_while_negotiating_aborts_publish() {
    let session = TestSession::connected().await;
    let publish = session.spawn_publish(camera_stream());
    let peer = session.peers.wait_for_peer(0).await;

    session.handle.unpublish(&peer.stream_id()).await.unwrap();

    assert!(matches!(
        publish.await.unwrap(),
        Err(ClientError::Aborted(_))
    ));
    assert!(peer.is_closed());
    assert!(session.handle.local_streams().await.unwrap().is_empty());

    // The closed connection can no longer resolve the flow.
    peer.connectivity(ConnectivityState::Connected);
    session.assert_consistent().await;
}

#[tokio::test]
async fn test_unpublish_of_remote_stream_is_invalid() {
    let mut session = TestSession::connected().await;
    session.announce("7").await;

    let result = session.handle.unpublish(&StreamId::new("7")).await;

    assert!(matches!(
        result,
        Err(ClientError::InvalidStream(reason)) if reason == "stream is not local"
    ));
    assert!(session.channel.requests_named("unpublish").is_empty());
}

#[tokio::test]
async fn test_rejected_unpublish_keeps_stream() {
    let session = TestSession::connected().await;
    let id = publish_ready(&session, camera_stream(), 0).await;
    session.channel.reject("unpublish", "busy");

    let result = session.handle.unpublish(&id).await;

    assert!(matches!(result, Err(ClientError::SignalingRejected(_))));
    assert_eq!(session.handle.local_streams().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_close_stream_unpublishes_ready_stream() {
    let session = TestSession::connected().await;
    let id = publish_ready(&session, camera_stream(), 0).await;

    session.handle.close_stream(&id).await.unwrap();

    assert!(session.handle.local_streams().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_stream_before_ready_is_not_available() {
    let session = TestSession::connected().await;
    let _publish = session.spawn_publish(camera_stream());
    session.peers.wait_for_peer(0).await;

    let result = session.handle.close_stream(&StreamId::new("100")).await;

    assert!(matches!(result, Err(ClientError::ControlNotReady(_))));
}

#[tokio::test]
async fn test_publish_events_only_for_local_streams() {
    let mut session = TestSession::connected().await;
    let id = publish_ready(&session, camera_stream(), 0).await;

    session.channel.push("video-off", json!({ "id": "999" }));
    session.channel.push("video-off", json!({ "id": id.as_str() }));

    match session.expect_event("video-off").await {
        ClientEvent::VideoOff(info) => assert_eq!(info.id, id),
        other => assert_eq!(other.name(), "video-off"),
    }
}
