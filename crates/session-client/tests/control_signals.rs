//! Tests for stream controls.
//!
//! Uses tokio's test-util time control features to verify:
//! - Outbound play/pause signals map to the right control action
//! - Hold/ready notifications wait for a subscription's controls
//! - Redelivery gives up after the configured attempts
//! - Redelivery is dropped once its session ends

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::StreamId;
use sc_test_utils::*;
use serde_json::json;
use session_client::peer::ConnectivityState;
use session_client::{ClientError, ClientEvent, ControlSignal};
use std::time::Duration;

/// Announce `id`, subscribe and bring the subscription up.
async fn subscribe_ready(session: &mut TestSession, id: &str, peer_index: usize) {
    session.announce(id).await;
    let subscribe = session.spawn_subscribe(id);
    let peer = session.peers.wait_for_peer(peer_index).await;
    peer.media_arrived(&format!("inbound-{id}"));
    peer.connectivity(ConnectivityState::Connected);
    subscribe.await.unwrap().unwrap();
}

fn count_named(events: &[ClientEvent], name: &str) -> usize {
    events.iter().filter(|event| event.name() == name).count()
}

// ============================================================================
// Outbound signals
// ============================================================================

#[tokio::test]
async fn test_signal_on_published_stream() {
    let session = TestSession::connected().await;
    let publish = session.spawn_publish(camera_stream());
    session
        .peers
        .wait_for_peer(0)
        .await
        .connectivity(ConnectivityState::Connected);
    let id = publish.await.unwrap().unwrap();

    session
        .handle
        .signal(&id, ControlSignal::PauseAudio)
        .await
        .unwrap();

    assert_eq!(
        session
            .channel
            .requests_named("customMessage")
            .first()
            .map(|sent| sent.payload.clone()),
        Some(json!({
            "type": "control",
            "payload": { "action": "audio-out-off", "streamId": "100" },
        }))
    );
}

#[tokio::test]
async fn test_signal_on_subscribed_stream() {
    let mut session = TestSession::connected().await;
    subscribe_ready(&mut session, "7", 0).await;

    session
        .handle
        .signal(&StreamId::new("7"), ControlSignal::PlayVideo)
        .await
        .unwrap();

    let sent = session.channel.requests_named("customMessage");
    assert_eq!(
        sent.first()
            .and_then(|s| s.payload.pointer("/payload/action").cloned()),
        Some(json!("video-in-on"))
    );
}

#[tokio::test]
async fn test_signal_before_ready_is_rejected() {
    let mut session = TestSession::connected().await;
    session.announce("7").await;
    let _subscribe = session.spawn_subscribe("7");
    session.peers.wait_for_peer(0).await;

    let negotiating = session
        .handle
        .signal(&StreamId::new("7"), ControlSignal::PauseVideo)
        .await;
    let unknown = session
        .handle
        .signal(&StreamId::new("404"), ControlSignal::PauseVideo)
        .await;

    assert!(matches!(negotiating, Err(ClientError::ControlNotReady(_))));
    assert!(matches!(unknown, Err(ClientError::StreamNotFound(_))));
    assert!(session.channel.requests_named("customMessage").is_empty());
}

#[tokio::test]
async fn test_signal_requires_connection() {
    let session = TestSession::start();

    let result = session
        .handle
        .signal(&StreamId::new("7"), ControlSignal::PlayAudio)
        .await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_rejected_signal() {
    let mut session = TestSession::connected().await;
    subscribe_ready(&mut session, "7", 0).await;
    session.channel.reject("customMessage", "not allowed");

    let result = session
        .handle
        .signal(&StreamId::new("7"), ControlSignal::PauseAudio)
        .await;

    assert!(matches!(
        result,
        Err(ClientError::SignalingRejected(reason)) if reason == "not allowed"
    ));
}

// ============================================================================
// Inbound hold/ready
// ============================================================================

#[tokio::test]
async fn test_hold_on_ready_stream_is_immediate() {
    let mut session = TestSession::connected().await;
    subscribe_ready(&mut session, "7", 0).await;

    session.channel.push("video-hold", json!({ "id": "7" }));

    match session.expect_event("video-hold").await {
        ClientEvent::VideoHold(info) => assert_eq!(info.id, StreamId::new("7")),
        other => assert_eq!(other.name(), "video-hold"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hold_waits_for_controls() {
    let mut session = TestSession::connected().await;
    session.announce("7").await;
    let subscribe = session.spawn_subscribe("7");
    let peer = session.peers.wait_for_peer(0).await;

    session.channel.push("audio-hold", json!({ "id": "7" }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count_named(&session.drain_events(), "audio-hold"), 0);

    peer.connectivity(ConnectivityState::Connected);
    let held = session.expect_event("audio-hold").await;
    assert_eq!(held.stream().map(|s| s.id.clone()), Some(StreamId::new("7")));

    peer.media_arrived("inbound-7");
    subscribe.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hold_is_dropped_after_retry_limit() {
    let mut session = TestSession::connected().await;
    session.announce("7").await;
    let _subscribe = session.spawn_subscribe("7");
    let peer = session.peers.wait_for_peer(0).await;

    session.channel.push("video-ready", json!({ "id": "7" }));
    // test_config allows 5 attempts 20ms apart.
    tokio::time::sleep(Duration::from_millis(500)).await;

    peer.connectivity(ConnectivityState::Connected);
    session.handle.status().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count_named(&session.drain_events(), "video-ready"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hold_for_unsubscribed_stream_is_missed() {
    let mut session = TestSession::connected().await;
    session.announce("7").await;

    session.channel.push("audio-ready", json!({ "id": "7" }));
    session.channel.push("audio-ready", json!({ "id": "404" }));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count_named(&session.drain_events(), "audio-ready"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retried_hold_does_not_outlive_the_session() {
    let mut config = test_config();
    config.control_retry_interval = Duration::from_secs(1);
    let mut session = TestSession::start_with(config);
    session.handle.connect(credentials()).await.unwrap();
    session.expect_event("client-connected").await;

    session.announce("7").await;
    let _subscribe = session.spawn_subscribe("7");
    session.peers.wait_for_peer(0).await;
    session.channel.push("video-hold", json!({ "id": "7" }));
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Same stream id, ready in the next session before the retry fires.
    session.handle.disconnect().await.unwrap();
    session.handle.connect(credentials()).await.unwrap();
    session.expect_event("client-connected").await;
    subscribe_ready(&mut session, "7", 1).await;
    session.drain_events();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(count_named(&session.drain_events(), "video-hold"), 0);
    session.assert_consistent().await;
}

#[tokio::test]
async fn test_all_audio_hold_reaches_ready_subscriptions() {
    let mut session = TestSession::connected().await;
    subscribe_ready(&mut session, "7", 0).await;
    session.announce("8").await;

    session.channel.push("all-audio-hold", json!(null));
    let held = session.expect_event("audio-hold").await;
    assert_eq!(held.stream().map(|s| s.id.clone()), Some(StreamId::new("7")));

    session.channel.push("all-audio-ready", json!(null));
    session.expect_event("audio-ready").await;
    assert_eq!(count_named(&session.drain_events(), "audio-hold"), 0);
}
