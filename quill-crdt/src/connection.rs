//! The live-client side of a session: an opaque id, an outbound frame
//! sender, and the set of awareness client IDs this connection introduced.

use std::collections::HashSet;
use tokio::sync::mpsc;

/// Identifies a connection within its session. Also doubles as the CRDT
/// "origin" tag used to suppress echo on document updates.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(pub u64);

/// Outbound channel half held by the session; the server-side transport
/// task owns the paired receiver and is responsible for actually writing
/// frames to the socket. Decoupling the send from the transport means a
/// slow client never blocks the session mutex.
pub type OutboundSender = mpsc::UnboundedSender<Vec<u8>>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
	mpsc::unbounded_channel()
}

/// One live client socket, as tracked inside a `NoteSession`.
pub struct Connection {
	pub id: ConnectionId,
	sender: OutboundSender,
	pub owned_awareness_ids: HashSet<u64>,
}

impl Connection {
	pub fn new(id: ConnectionId, sender: OutboundSender) -> Connection {
		Connection { id, sender, owned_awareness_ids: HashSet::new() }
	}

	/// Enqueues an outbound frame. Never blocks; fails only if the
	/// transport task has already torn down, in which case the frame is
	/// simply dropped (the disconnect will be observed shortly after via
	/// the transport's own close/error path).
	pub fn send(&self, frame: Vec<u8>) {
		let _ = self.sender.send(frame);
	}
}
