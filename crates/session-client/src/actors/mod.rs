//! Actor model implementation for the session client.
//!
//! One `SessionActor` per client session. It owns all mutable state and is
//! reached only through a cloneable [`SessionClientHandle`]:
//!
//! ```text
//! SessionClientHandle (cloneable, caller side)
//! └── SessionActor (one per session)
//!     ├── owns session state + StreamRegistry
//!     ├── drives publish/subscribe flows
//!     ├── forwarder task: channel push events -> internal queue
//!     └── notifier task: fire-and-forget messages, in order
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: registry and flow state are only touched on the actor task
//! - **Epoch tagging**: request completions from before a disconnect are discarded
//! - **Exactly-once outcomes**: every flow resolves through [`ResolveOnce`]
//! - **CancellationToken propagation**: helper tasks run on child tokens
//!
//! # Modules
//!
//! - [`session`] - `SessionActor`, its handle and the connection lifecycle
//! - [`publish`] - publish flow
//! - [`subscribe`] - subscribe flow
//! - [`control`] - control signals and hold/ready redelivery
//! - [`flow`] - per-flow state and the resolve-once guard
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and flow counters

pub mod control;
pub mod flow;
pub mod messages;
pub mod metrics;
pub mod publish;
pub mod session;
pub mod subscribe;

// Re-export primary types
pub use flow::{FlowId, FlowKind, ResolveOnce};
pub use messages::{ControlEvent, ControlEventKind, SessionMessage, SessionStatus};
pub use metrics::{FlowMetrics, FlowMetricsSnapshot, MailboxLevel, MailboxMonitor, SessionMetrics};
pub use session::{SessionActor, SessionClientHandle, SessionState};
