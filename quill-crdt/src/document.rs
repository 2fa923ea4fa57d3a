//! Wraps the CRDT document: the note body as a `yrs` shared text, the Yjs
//! sync-protocol sub-messages layered on top of it, and the update-event
//! hook a `NoteSession` uses to fan out changes without double delivery.

use std::sync::Mutex;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact, Update};

use quill_core::prelude::*;

use crate::connection::ConnectionId;
use crate::frame::{read_var_buf, read_var_u64, write_var_buf, write_var_u64};

const TEXT_FIELD: &str = "content";

const SYNC_STEP1: u64 = 0;
const SYNC_STEP2: u64 = 1;
const SYNC_UPDATE: u64 = 2;

/// A `SYNC`-frame sub-message, per the Yjs sync protocol.
pub enum SyncMessage {
	/// The sender's state vector; the receiver replies with `Step2`.
	Step1(Vec<u8>),
	/// The ops the requester was missing, relative to the state vector it sent.
	Step2(Vec<u8>),
	/// An incremental update applied directly (no round trip needed).
	Update(Vec<u8>),
}

impl SyncMessage {
	pub fn decode(mut input: &[u8]) -> ClResult<SyncMessage> {
		let tag = read_var_u64(&mut input)?;
		let body = read_var_buf(&mut input)?.to_vec();
		match tag {
			SYNC_STEP1 => Ok(SyncMessage::Step1(body)),
			SYNC_STEP2 => Ok(SyncMessage::Step2(body)),
			SYNC_UPDATE => Ok(SyncMessage::Update(body)),
			other => Err(Error::ProtocolError(format!("unknown sync sub-message tag {other}"))),
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		let (tag, body) = match self {
			SyncMessage::Step1(b) => (SYNC_STEP1, b),
			SyncMessage::Step2(b) => (SYNC_STEP2, b),
			SyncMessage::Update(b) => (SYNC_UPDATE, b),
		};
		let mut out = Vec::with_capacity(body.len() + 4);
		write_var_u64(&mut out, tag);
		write_var_buf(&mut out, body);
		out
	}
}

type UpdateHandler = dyn Fn(&[u8], Option<ConnectionId>) + Send + Sync;

pub struct DocumentReplica {
	doc: Doc,
	text: TextRef,
	handler: Mutex<Option<Box<UpdateHandler>>>,
}

impl DocumentReplica {
	/// Creates a document seeded with `initial_content`. The seed insert runs
	/// before any handler is registered and before any connection exists, so
	/// it is never fanned out — satisfying the `origin = None` / no-broadcast
	/// requirement for initial content without needing to special-case it.
	pub fn new(initial_content: &str) -> DocumentReplica {
		let doc = Doc::new();
		let text = doc.get_or_insert_text(TEXT_FIELD);
		{
			let mut txn = doc.transact_mut();
			text.insert(&mut txn, 0, initial_content);
		}
		DocumentReplica { doc, text, handler: Mutex::new(None) }
	}

	/// Registers the handler invoked for every committed change to the
	/// document, whether from a remote sync message or a local mutation.
	pub fn on_update(&self, f: impl Fn(&[u8], Option<ConnectionId>) + Send + Sync + 'static) {
		let mut guard = self.handler.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		*guard = Some(Box::new(f));
	}

	fn notify(&self, update: &[u8], origin: Option<ConnectionId>) {
		let guard = self.handler.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		if let Some(f) = guard.as_deref() {
			f(update, origin);
		}
	}

	/// Feeds an inbound `SYNC` sub-message into the document, tagged with
	/// the submitting connection as origin. Returns a `Step2` reply when the
	/// input was a `Step1` state-vector request.
	pub fn apply_remote_sync(
		&self,
		payload: &[u8],
		origin: ConnectionId,
	) -> ClResult<Option<Vec<u8>>> {
		let message = SyncMessage::decode(payload)?;
		match message {
			SyncMessage::Step1(state_vector) => {
				let sv = StateVector::decode_v1(&state_vector)
					.map_err(|e| Error::ProtocolError(format!("bad state vector: {e}")))?;
				let txn = self.doc.transact();
				let update = txn.encode_state_as_update_v1(&sv);
				Ok(Some(SyncMessage::Step2(update).encode()))
			}
			SyncMessage::Step2(bytes) | SyncMessage::Update(bytes) => {
				let update = Update::decode_v1(&bytes)
					.map_err(|e| Error::ProtocolError(format!("bad update: {e}")))?;
				let before = {
					let txn = self.doc.transact();
					txn.state_vector()
				};
				{
					let mut txn = self.doc.transact_mut();
					txn.apply_update(update)
						.map_err(|e| Error::ProtocolError(format!("apply_update failed: {e}")))?;
				}
				let after = {
					let txn = self.doc.transact();
					txn.state_vector()
				};
				if after != before {
					let txn = self.doc.transact();
					let delta = txn.encode_state_as_update_v1(&before);
					self.notify(&delta, Some(origin));
				}
				Ok(None)
			}
		}
	}

	/// The document's text content, for tests and for seeding diagnostics.
	pub fn text(&self) -> String {
		let txn = self.doc.transact();
		self.text.get_string(&txn)
	}

	pub fn destroy(self) {
		drop(self);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex as StdMutex};

	#[test]
	fn seed_content_is_not_broadcast() {
		let events: Arc<StdMutex<Vec<Option<ConnectionId>>>> = Arc::new(StdMutex::new(Vec::new()));
		let events_clone = events.clone();
		let doc = DocumentReplica::new("hello");
		doc.on_update(move |_bytes, origin| events_clone.lock().unwrap_or_else(|p| p.into_inner()).push(origin));
		assert_eq!(doc.text(), "hello");
		assert!(events.lock().unwrap_or_else(|p| p.into_inner()).is_empty());
	}

	#[test]
	fn step1_yields_step2_with_full_state() {
		let doc = DocumentReplica::new("hello");
		let empty_sv = StateVector::default().encode_v1();
		let reply = doc
			.apply_remote_sync(&SyncMessage::Step1(empty_sv).encode(), ConnectionId(1))
			.expect("apply")
			.expect("step2 reply");
		match SyncMessage::decode(&reply).expect("decode reply") {
			SyncMessage::Step2(update) => {
				let peer = DocumentReplica::new("");
				let decoded = Update::decode_v1(&update).expect("decode update");
				{
					let mut txn = peer.doc.transact_mut();
					txn.apply_update(decoded).expect("apply");
				}
				assert_eq!(peer.text(), "hello");
			}
			_ => panic!("expected step2"),
		}
	}

	#[test]
	fn remote_update_fires_handler_with_origin() {
		let seen: Arc<StdMutex<Option<ConnectionId>>> = Arc::new(StdMutex::new(None));
		let seen_clone = seen.clone();
		let doc = DocumentReplica::new("hello");
		doc.on_update(move |_bytes, origin| *seen_clone.lock().unwrap_or_else(|p| p.into_inner()) = origin);

		let peer = DocumentReplica::new("hello");
		peer.on_update(|_, _| {});
		{
			let mut txn = peer.doc.transact_mut();
			peer.text.insert(&mut txn, 5, " world");
		}
		let update = {
			let txn = peer.doc.transact();
			txn.encode_state_as_update_v1(&StateVector::default())
		};

		doc.apply_remote_sync(&SyncMessage::Update(update).encode(), ConnectionId(42)).expect("apply");
		assert_eq!(doc.text(), "hello world");
		assert_eq!(*seen.lock().unwrap_or_else(|p| p.into_inner()), Some(ConnectionId(42)));
	}
}
