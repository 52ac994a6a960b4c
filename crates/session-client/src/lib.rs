//! Session Client Library
//!
//! Client-side orchestrator for a real-time audio/video session:
//!
//! - Connection lifecycle with a signaling server (connect, disconnect, reconnect)
//! - Registry of local (published) and remote (announced) streams
//! - Publish and subscribe handshakes over pluggable peer connections
//! - Play/pause control signals and hold/ready notifications
//! - A broadcast event bus for everything observable
//!
//! # Architecture
//!
//! ```text
//! SessionClientHandle ──mailbox──> SessionActor
//!                                  ├── StreamRegistry (local + remote)
//!                                  ├── publish / subscribe flows
//!                                  │   └── dyn PeerConnection (one per negotiating stream)
//!                                  ├── dyn SignalingChannel (requests, notifications, pushes)
//!                                  └── EventBus ──> application subscribers
//! ```
//!
//! The transport ([`signaling::SignalingChannel`]) and the negotiation
//! engine ([`peer::PeerConnectionFactory`]) are traits supplied by the
//! embedding application.
//!
//! # Modules
//!
//! - [`actors`] - `SessionActor`, its handle and the handshake flows
//! - [`config`] - Client configuration from environment
//! - [`errors`] - Error types with stable error codes
//! - [`events`] - Public events and the event bus
//! - [`ice`] - ICE server list normalisation
//! - [`peer`] - Peer connection abstraction
//! - [`registry`] - Stream registry
//! - [`signaling`] - Signaling channel abstraction and wire protocol
//! - [`stream`] - Stream model

pub mod actors;
pub mod config;
pub mod errors;
pub mod events;
pub mod ice;
pub mod peer;
pub mod registry;
pub mod signaling;
pub mod stream;

pub use actors::{SessionClientHandle, SessionState, SessionStatus};
pub use config::{ClientConfig, ConfigError};
pub use errors::ClientError;
pub use events::{ClientEvent, EventBus};
pub use ice::{IceServer, IceServerInput};
pub use signaling::{ControlSignal, Credentials, SignalingChannel};
pub use stream::{Capabilities, LocalStream, Origin, StreamInfo};
