//! Realtime note collaboration core: CRDT document/awareness replicas,
//! per-note session fan-out and lifecycle, over the Yjs sync protocol.
//!
//! Deliberately transport-agnostic — no `axum`, no WebSocket framing. A
//! `Connection` is fed by a generic `tokio::sync::mpsc` channel; the
//! server crate owns the actual socket.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod awareness;
pub mod connection;
pub mod document;
pub mod frame;
pub mod registry;
pub mod session;

pub use awareness::{AwarenessChange, AwarenessReplica};
pub use connection::{outbound_channel, Connection, ConnectionId, OutboundReceiver, OutboundSender};
pub use document::{DocumentReplica, SyncMessage};
pub use frame::{decode_frame, encode_frame, MessageType};
pub use registry::Gateway;
pub use session::NoteSession;

// vim: ts=4
