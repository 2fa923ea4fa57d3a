//! Per-note aggregate: the document and awareness replicas plus the set of
//! attached connections, and the fan-out rules that tie them together.
//!
//! `connections` is guarded by a plain `std::sync::Mutex` rather than a
//! tokio one: the CRDT replicas invoke their update/change handlers
//! synchronously (see `document::DocumentReplica::on_update`), and fan-out
//! must happen from inside that synchronous callback to preserve the
//! per-connection ordering §5 requires — an async mutex would force a
//! detached `tokio::spawn` per update, which reorders concurrent deltas
//! relative to each other. The critical sections here are plain map
//! operations, so a std mutex held across them never blocks on I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use quill_core::prelude::*;

use crate::awareness::{AwarenessChange, AwarenessReplica};
use crate::connection::{Connection, ConnectionId};
use crate::document::{DocumentReplica, SyncMessage};
use crate::frame::{encode_frame, MessageType};

type EmptyHandler = dyn Fn() + Send + Sync;
type BeforeDestroyHandler = dyn Fn(&NoteSession) + Send + Sync;

struct SessionInner {
	connections: HashMap<ConnectionId, Connection>,
}

/// Owns one note's live collaboration state. Cheap to hold as
/// `Arc<NoteSession>`; every mutation to `connections` goes through the
/// single mutex, so attach/detach and replica-driven fan-out stay ordered.
pub struct NoteSession {
	pub note_id: NoteId,
	document: DocumentReplica,
	awareness: AwarenessReplica,
	inner: Mutex<SessionInner>,
	on_empty: Mutex<Option<Box<EmptyHandler>>>,
	/// Registered by a persister (§9); invoked with a read-only view of the
	/// session just before the registry unlinks it, separately from
	/// `on_empty`, which the registry itself already uses for its own
	/// bookkeeping and doesn't share with other callers.
	on_before_destroy: Mutex<Option<Box<BeforeDestroyHandler>>>,
}

impl NoteSession {
	pub fn new(note_id: NoteId, initial_content: &str) -> Arc<NoteSession> {
		let session = Arc::new(NoteSession {
			note_id,
			document: DocumentReplica::new(initial_content),
			awareness: AwarenessReplica::new(),
			inner: Mutex::new(SessionInner { connections: HashMap::new() }),
			on_empty: Mutex::new(None),
			on_before_destroy: Mutex::new(None),
		});

		// `Weak` here, not `Arc`: a strong reference would let the document's
		// own handler closure keep the session (and hence the document
		// itself) alive forever, defeating the destroy-on-last-detach
		// invariant. Both handlers only ever fire while some other strong
		// reference (the registry's, or an in-flight `route_frame` call) is
		// known to be alive, so the upgrade never actually fails in practice.
		let doc_session: Weak<NoteSession> = Arc::downgrade(&session);
		session.document.on_update(move |update, origin| {
			if let Some(session) = doc_session.upgrade() {
				session.fan_out_doc_update(update, origin);
			}
		});

		let awareness_session: Weak<NoteSession> = Arc::downgrade(&session);
		session.awareness.on_change(move |change, origin| {
			if let Some(session) = awareness_session.upgrade() {
				session.fan_out_awareness_change(change, origin);
			}
		});

		session
	}

	/// Registers the callback invoked once, after a `detach` leaves
	/// `connections` empty. The registry uses this to unregister and destroy
	/// the session.
	pub fn on_empty(&self, f: impl Fn() + Send + Sync + 'static) {
		let mut guard = self.on_empty.lock().unwrap_or_else(|p| p.into_inner());
		*guard = Some(Box::new(f));
	}

	/// Registers a persister's hook, run with a read-only view of the session
	/// once it goes empty but before the registry unlinks it. Distinct from
	/// `on_empty` so a persister doesn't have to know about (or displace) the
	/// registry's own destroy-time bookkeeping.
	pub fn on_before_destroy(&self, f: impl Fn(&NoteSession) + Send + Sync + 'static) {
		let mut guard = self.on_before_destroy.lock().unwrap_or_else(|p| p.into_inner());
		*guard = Some(Box::new(f));
	}

	/// The document's current text, for a persister's `on_before_destroy` hook.
	pub fn content(&self) -> String {
		self.document.text()
	}

	/// Sends a server-to-client `HEDGEDOC` frame to a single connection
	/// (permission-change and similar out-of-band notifications, per §4.1).
	/// Silently drops if `connection_id` isn't attached.
	pub fn send_hedgedoc(&self, connection_id: ConnectionId, tag: u64, payload: &[u8]) {
		let frame = encode_frame(MessageType::HedgeDoc(tag), payload);
		let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
		if let Some(connection) = inner.connections.get(&connection_id) {
			connection.send(frame);
		}
	}

	/// Sends a server-to-client `HEDGEDOC` frame to every attached connection.
	pub fn broadcast_hedgedoc(&self, tag: u64, payload: &[u8]) {
		let frame = encode_frame(MessageType::HedgeDoc(tag), payload);
		let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
		for connection in inner.connections.values() {
			connection.send(frame.clone());
		}
	}

	pub fn attach(&self, connection: Connection) {
		let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
		inner.connections.insert(connection.id, connection);
	}

	/// Removes the connection, publishes removal of any awareness IDs it
	/// owned, and invokes `on_empty` if it was the last one.
	pub fn detach(&self, connection_id: ConnectionId) {
		let owned_ids: Vec<u64>;
		let became_empty;
		{
			let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
			let Some(connection) = inner.connections.remove(&connection_id) else {
				return;
			};
			owned_ids = connection.owned_awareness_ids.into_iter().collect();
			became_empty = inner.connections.is_empty();
		}
		if !owned_ids.is_empty() {
			self.awareness.remove_states(&owned_ids);
		}
		if became_empty {
			{
				let guard = self.on_before_destroy.lock().unwrap_or_else(|p| p.into_inner());
				if let Some(f) = guard.as_deref() {
					f(self);
				}
			}
			let guard = self.on_empty.lock().unwrap_or_else(|p| p.into_inner());
			if let Some(f) = guard.as_deref() {
				f();
			}
		}
	}

	/// Dispatches a decoded frame to the right replica. `MessageType::HedgeDoc`
	/// is accepted and discarded per §9 — this core defines no inbound
	/// meaning for it.
	pub fn route_frame(&self, connection_id: ConnectionId, message_type: MessageType, payload: &[u8]) -> ClResult<()> {
		match message_type {
			MessageType::Sync => {
				if let Some(reply) = self.document.apply_remote_sync(payload, connection_id)? {
					let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
					if let Some(connection) = inner.connections.get(&connection_id) {
						connection.send(reply);
					}
				}
				Ok(())
			}
			MessageType::Awareness => {
				self.awareness.apply_remote(payload, connection_id)?;
				Ok(())
			}
			MessageType::HedgeDoc(_) => {
				debug!("discarding inbound HEDGEDOC frame for {:?}", self.note_id);
				Ok(())
			}
		}
	}

	fn fan_out_doc_update(&self, update: &[u8], origin: Option<ConnectionId>) {
		let frame = encode_frame(MessageType::Sync, &SyncMessage::Update(update.to_vec()).encode());
		let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
		for connection in inner.connections.values() {
			if Some(connection.id) != origin {
				connection.send(frame.clone());
			}
		}
	}

	/// Records newly-owned IDs on the originating connection, then
	/// broadcasts to every connection including the originator (§4.4).
	fn fan_out_awareness_change(&self, change: &AwarenessChange, origin: Option<ConnectionId>) {
		let mut ids = Vec::with_capacity(change.added.len() + change.updated.len() + change.removed.len());
		ids.extend(change.added.iter().copied());
		ids.extend(change.updated.iter().copied());
		ids.extend(change.removed.iter().copied());
		if ids.is_empty() {
			return;
		}

		let payload = self.awareness.encode_states(&ids);
		let frame = encode_frame(MessageType::Awareness, &payload);

		let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
		if let Some(origin_id) = origin {
			if let Some(connection) = inner.connections.get_mut(&origin_id) {
				connection.owned_awareness_ids.extend(change.added.iter().copied());
				connection.owned_awareness_ids.extend(change.removed.iter().copied());
			}
		}
		for connection in inner.connections.values() {
			connection.send(frame.clone());
		}
	}

	pub fn connection_count(&self) -> usize {
		self.inner.lock().unwrap_or_else(|p| p.into_inner()).connections.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::connection::outbound_channel;

	fn attach_test_connection(session: &Arc<NoteSession>, id: u64) -> (ConnectionId, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) {
		let (tx, rx) = outbound_channel();
		let connection_id = ConnectionId(id);
		session.attach(Connection::new(connection_id, tx));
		(connection_id, rx)
	}

	#[test]
	fn solo_edit_produces_no_broadcast() {
		let session = NoteSession::new(NoteId::from("note-1"), "hello");
		let (a, mut a_rx) = attach_test_connection(&session, 1);

		let empty_sv = yrs::StateVector::default();
		use yrs::updates::encoder::Encode;
		let step1 = SyncMessage::Step1(empty_sv.encode_v1()).encode();
		session.route_frame(a, MessageType::Sync, &step1).expect("route step1");
		assert!(a_rx.try_recv().is_ok(), "expects a step2 reply");
		assert!(a_rx.try_recv().is_err(), "no further broadcast to the sole peer");
	}

	#[test]
	fn awareness_echoes_to_originator_and_peers() {
		let session = NoteSession::new(NoteId::from("note-1"), "");
		let (a, mut a_rx) = attach_test_connection(&session, 1);
		let (_b, mut b_rx) = attach_test_connection(&session, 2);

		let payload = crate::awareness::encode_single(42, 1, "{}");
		session.route_frame(a, MessageType::Awareness, &payload).expect("route awareness");

		assert!(a_rx.try_recv().is_ok(), "origin receives the echo");
		assert!(b_rx.try_recv().is_ok(), "peer receives the update");
	}

	#[test]
	fn detach_last_connection_invokes_on_empty() {
		let session = NoteSession::new(NoteId::from("note-1"), "");
		let (a, _rx) = attach_test_connection(&session, 1);

		let fired = Arc::new(Mutex::new(false));
		let fired_clone = fired.clone();
		session.on_empty(move || *fired_clone.lock().unwrap_or_else(|p| p.into_inner()) = true);

		session.detach(a);
		assert!(*fired.lock().unwrap_or_else(|p| p.into_inner()));
		assert_eq!(session.connection_count(), 0);
	}

	#[test]
	fn on_before_destroy_runs_before_on_empty_with_session_still_usable() {
		let session = NoteSession::new(NoteId::from("note-1"), "hello");
		let (a, _rx) = attach_test_connection(&session, 1);

		let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
		let seen_content: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

		let order_clone = order.clone();
		let seen_content_clone = seen_content.clone();
		session.on_before_destroy(move |note_session| {
			order_clone.lock().unwrap_or_else(|p| p.into_inner()).push("before_destroy");
			*seen_content_clone.lock().unwrap_or_else(|p| p.into_inner()) = Some(note_session.content());
		});
		let order_clone = order.clone();
		session.on_empty(move || order_clone.lock().unwrap_or_else(|p| p.into_inner()).push("empty"));

		session.detach(a);

		assert_eq!(*order.lock().unwrap_or_else(|p| p.into_inner()), vec!["before_destroy", "empty"]);
		assert_eq!(seen_content.lock().unwrap_or_else(|p| p.into_inner()).as_deref(), Some("hello"));
	}

	#[test]
	fn broadcast_hedgedoc_reaches_every_connection() {
		let session = NoteSession::new(NoteId::from("note-1"), "");
		let (_a, mut a_rx) = attach_test_connection(&session, 1);
		let (_b, mut b_rx) = attach_test_connection(&session, 2);

		session.broadcast_hedgedoc(7, b"permission-changed");

		let a_frame = a_rx.try_recv().expect("a receives the notification");
		let b_frame = b_rx.try_recv().expect("b receives the notification");
		assert_eq!(a_frame, b_frame);
	}

	#[test]
	fn disconnect_publishes_owned_awareness_removal() {
		let session = NoteSession::new(NoteId::from("note-1"), "");
		let (a, _a_rx) = attach_test_connection(&session, 1);
		let (_b, mut b_rx) = attach_test_connection(&session, 2);

		let payload = crate::awareness::encode_single(42, 1, "{}");
		session.route_frame(a, MessageType::Awareness, &payload).expect("route awareness");
		let _ = b_rx.try_recv(); // drain the echo from the add above

		session.detach(a);
		let removal_frame = b_rx.try_recv().expect("peer observes the synthesized removal");
		assert!(!removal_frame.is_empty());
	}
}
