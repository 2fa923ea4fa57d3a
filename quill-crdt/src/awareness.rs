//! Wraps ephemeral per-client presence state (cursors, selections, user
//! color) — layered on top of the document but not part of it, so its own
//! clock/removal semantics live here rather than in `DocumentReplica`.
//!
//! Implemented directly against the wire format the Yjs awareness protocol
//! defines (a varuint client count, then per client: client id, clock,
//! JSON-encoded state or the literal `null` for a removal) rather than via
//! `yrs`'s own document model, since awareness state is explicitly not part
//! of the CRDT document.

use std::collections::HashMap;
use std::sync::Mutex;

use quill_core::prelude::*;

use crate::connection::ConnectionId;
use crate::frame::{read_var_buf, read_var_u64, write_var_buf, write_var_u64};

#[derive(Clone, Debug, Default)]
pub struct AwarenessChange {
	pub added: Vec<u64>,
	pub updated: Vec<u64>,
	pub removed: Vec<u64>,
}

impl AwarenessChange {
	fn is_empty(&self) -> bool {
		self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
	}
}

struct ClientState {
	clock: u64,
	json: Option<String>,
}

type ChangeHandler = dyn Fn(&AwarenessChange, Option<ConnectionId>) + Send + Sync;

pub struct AwarenessReplica {
	clients: Mutex<HashMap<u64, ClientState>>,
	handler: Mutex<Option<Box<ChangeHandler>>>,
}

impl AwarenessReplica {
	pub fn new() -> AwarenessReplica {
		AwarenessReplica { clients: Mutex::new(HashMap::new()), handler: Mutex::new(None) }
	}

	pub fn on_change(&self, f: impl Fn(&AwarenessChange, Option<ConnectionId>) + Send + Sync + 'static) {
		let mut guard = self.handler.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		*guard = Some(Box::new(f));
	}

	fn notify(&self, change: &AwarenessChange, origin: Option<ConnectionId>) {
		if change.is_empty() {
			return;
		}
		let guard = self.handler.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		if let Some(f) = guard.as_deref() {
			f(change, origin);
		}
	}

	/// Applies a peer's awareness update, attributing every add/remove to
	/// `origin`. `updated` entries are reported but not attributed, matching
	/// the ownership rule in `Connection::owned_awareness_ids`.
	pub fn apply_remote(&self, payload: &[u8], origin: ConnectionId) -> ClResult<()> {
		let entries = decode_awareness_payload(payload)?;
		let mut change = AwarenessChange::default();
		{
			let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
			for (client_id, clock, json) in entries {
				match clients.get(&client_id) {
					Some(existing) if existing.clock >= clock => continue,
					Some(_) if json.is_none() => {
						// Tombstone rather than remove: the entry must stay
						// addressable by `encode_states` with the incoming clock,
						// or a later re-encode of this id would regress to clock 0
						// and a real Yjs client would then ignore it (clock not
						// monotonically advancing).
						clients.insert(client_id, ClientState { clock, json: None });
						change.removed.push(client_id);
					}
					Some(_) => {
						clients.insert(client_id, ClientState { clock, json });
						change.updated.push(client_id);
					}
					None if json.is_none() => {
						// Removal of an ID we never saw added: nothing to report.
					}
					None => {
						clients.insert(client_id, ClientState { clock, json });
						change.added.push(client_id);
					}
				}
			}
		}
		self.notify(&change, Some(origin));
		Ok(())
	}

	/// Expires `ids` locally and broadcasts their removal with no origin
	/// (the session fans this out to every remaining peer). The entry is
	/// tombstoned (clock bumped, `json` cleared) rather than dropped from the
	/// map, so `encode_states` still has a real clock to encode for it — a
	/// removal encoded at clock 0 would be ignored by a real Yjs client if it
	/// had already seen this id at a higher clock.
	pub fn remove_states(&self, ids: &[u64]) {
		let mut change = AwarenessChange::default();
		{
			let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
			for &id in ids {
				if let Some(state) = clients.get_mut(&id) {
					state.clock += 1;
					state.json = None;
					change.removed.push(id);
				}
			}
		}
		self.notify(&change, None);
	}

	/// Encodes the current (or just-changed) state of `ids` as an outbound
	/// `AWARENESS` payload, used by the session to build the frame it fans
	/// out after `apply_remote`/`remove_states` reports a change.
	pub fn encode_states(&self, ids: &[u64]) -> Vec<u8> {
		let clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		let mut out = Vec::new();
		write_var_u64(&mut out, ids.len() as u64);
		for &id in ids {
			write_var_u64(&mut out, id);
			match clients.get(&id) {
				Some(state) => {
					write_var_u64(&mut out, state.clock);
					let json = state.json.as_deref().unwrap_or("null");
					write_var_buf(&mut out, json.as_bytes());
				}
				None => {
					// An id never seen at all (no add, no remove) — nothing real
					// to report, so clock 0 is the only sensible placeholder.
					write_var_u64(&mut out, 0);
					write_var_buf(&mut out, b"null");
				}
			}
		}
		out
	}
}

impl Default for AwarenessReplica {
	fn default() -> Self {
		AwarenessReplica::new()
	}
}

fn decode_awareness_payload(payload: &[u8]) -> ClResult<Vec<(u64, u64, Option<String>)>> {
	let mut input = payload;
	let count = read_var_u64(&mut input)?;
	let mut entries = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let client_id = read_var_u64(&mut input)?;
		let clock = read_var_u64(&mut input)?;
		let json_bytes = read_var_buf(&mut input)?;
		let json = std::str::from_utf8(json_bytes)
			.map_err(|_| Error::ProtocolError("awareness state is not utf8".into()))?;
		let state = if json == "null" { None } else { Some(json.to_string()) };
		entries.push((client_id, clock, state));
	}
	Ok(entries)
}

/// Encodes a single client's addition as an inbound-shaped payload; used by
/// connection handlers to synthesize awareness frames for tests and by the
/// server to build the frame a client would normally send.
pub fn encode_single(client_id: u64, clock: u64, json: &str) -> Vec<u8> {
	let mut out = Vec::new();
	write_var_u64(&mut out, 1);
	write_var_u64(&mut out, client_id);
	write_var_u64(&mut out, clock);
	write_var_buf(&mut out, json.as_bytes());
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex as StdMutex};

	#[test]
	fn apply_remote_adds_and_tracks_as_addition() {
		let awareness = AwarenessReplica::new();
		let seen: Arc<StdMutex<Option<AwarenessChange>>> = Arc::new(StdMutex::new(None));
		let seen_clone = seen.clone();
		awareness.on_change(move |change, _origin| {
			*seen_clone.lock().unwrap_or_else(|p| p.into_inner()) = Some(change.clone());
		});

		let payload = encode_single(42, 1, r#"{"cursor":5}"#);
		awareness.apply_remote(&payload, ConnectionId(1)).expect("apply");

		let change = seen.lock().unwrap_or_else(|p| p.into_inner()).clone().expect("change fired");
		assert_eq!(change.added, vec![42]);
		assert!(change.removed.is_empty());
	}

	#[test]
	fn remove_states_reports_removal_with_no_origin() {
		let awareness = AwarenessReplica::new();
		awareness.apply_remote(&encode_single(42, 1, "{}"), ConnectionId(1)).expect("apply");

		let seen: Arc<StdMutex<Vec<(AwarenessChange, Option<ConnectionId>)>>> =
			Arc::new(StdMutex::new(Vec::new()));
		let seen_clone = seen.clone();
		awareness.on_change(move |change, origin| {
			seen_clone.lock().unwrap_or_else(|p| p.into_inner()).push((change.clone(), origin));
		});

		awareness.remove_states(&[42]);

		let events = seen.lock().unwrap_or_else(|p| p.into_inner()).clone();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].0.removed, vec![42]);
		assert_eq!(events[0].1, None);
	}

	#[test]
	fn removal_is_encoded_with_the_advanced_clock() {
		let awareness = AwarenessReplica::new();
		awareness.apply_remote(&encode_single(42, 1, "{}"), ConnectionId(1)).expect("apply");

		awareness.remove_states(&[42]);

		let encoded = awareness.encode_states(&[42]);
		let mut cursor = encoded.as_slice();
		let count = read_var_u64(&mut cursor).expect("count");
		assert_eq!(count, 1);
		let id = read_var_u64(&mut cursor).expect("id");
		assert_eq!(id, 42);
		let clock = read_var_u64(&mut cursor).expect("clock");
		assert_eq!(clock, 2, "removal clock must advance past the add's clock of 1");
		let json = read_var_buf(&mut cursor).expect("json");
		assert_eq!(json, b"null");
	}

	#[test]
	fn remote_removal_is_encoded_with_the_incoming_clock() {
		let awareness = AwarenessReplica::new();
		awareness.apply_remote(&encode_single(7, 1, "{}"), ConnectionId(1)).expect("apply add");
		awareness.apply_remote(&encode_single(7, 2, "null"), ConnectionId(1)).expect("apply remove");

		let encoded = awareness.encode_states(&[7]);
		let mut cursor = encoded.as_slice();
		read_var_u64(&mut cursor).expect("count");
		read_var_u64(&mut cursor).expect("id");
		let clock = read_var_u64(&mut cursor).expect("clock");
		assert_eq!(clock, 2);
	}

	#[test]
	fn stale_update_is_ignored() {
		let awareness = AwarenessReplica::new();
		awareness.apply_remote(&encode_single(1, 5, "{}"), ConnectionId(1)).expect("apply");

		let seen: Arc<StdMutex<Vec<AwarenessChange>>> = Arc::new(StdMutex::new(Vec::new()));
		let seen_clone = seen.clone();
		awareness.on_change(move |change, _| seen_clone.lock().unwrap_or_else(|p| p.into_inner()).push(change.clone()));

		awareness.apply_remote(&encode_single(1, 1, "{}"), ConnectionId(2)).expect("apply stale");
		assert!(seen.lock().unwrap_or_else(|p| p.into_inner()).is_empty());
	}
}
