//! # Session Client Test Utilities
//!
//! Shared test utilities for the session client.
//!
//! This crate provides mock implementations and test fixtures for
//! isolated session client testing without a real server or media engine.
//!
//! ## Modules
//!
//! - `mock_signaling` - Scriptable in-memory signaling channel
//! - `mock_peer` - Peer connection factory whose connections are driven by the test
//! - `fixtures` - Pre-configured test data (credentials, config, streams) and a session harness
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let mut session = TestSession::connected().await;
//!
//!     session.channel.push("stream-added", stream_added_payload("7", true, true));
//!     session.expect_event("stream-added").await;
//!
//!     let subscribe = session.spawn_subscribe("7");
//!     let peer = session.peers.wait_for_peer(0).await;
//!     peer.media_arrived("inbound-7");
//!     peer.connectivity(ConnectivityState::Connected);
//!     subscribe.await.unwrap().unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_peer;
pub mod mock_signaling;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_peer::*;
pub use mock_signaling::*;
