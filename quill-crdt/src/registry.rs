//! The session gateway: authenticates connects, resolves notes, lazily
//! creates/destroys `NoteSession`s, and dispatches inbound frames by
//! connection id. See `document`/`awareness`/`session` for the per-note
//! state machinery this coordinates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use quill_core::prelude::*;
use quill_core::services::{CookieValidator, NoteService, PermissionsService, SessionService, UserService};

use crate::connection::{Connection, ConnectionId, OutboundSender};
use crate::frame::decode_frame;
use crate::session::NoteSession;

/// `note_id -> NoteSession` and `connection_id -> note_id`, each behind its
/// own plain mutex (§5): both are O(1) map operations, and splitting them
/// means dispatch never contends with connect/disconnect bookkeeping for an
/// unrelated note.
pub struct Gateway {
	note_service: Arc<dyn NoteService>,
	session_service: Arc<dyn SessionService>,
	user_service: Arc<dyn UserService>,
	permissions_service: Arc<dyn PermissionsService>,
	cookie_validator: Arc<dyn CookieValidator>,

	sessions: Mutex<HashMap<NoteId, Arc<NoteSession>>>,
	/// Per-`note_id` creation locks, so concurrent `get_or_create` calls for
	/// a brand new note serialize on a single `NoteService::content` fetch
	/// instead of racing one another (invariant 1 / scenario S6). Entries
	/// are never removed: the number of distinct notes ever touched by a
	/// running process is the natural bound, and removing them would
	/// reopen the exact race this exists to close.
	creation_locks: Mutex<HashMap<NoteId, Arc<tokio::sync::Mutex<()>>>>,
	connections: Mutex<HashMap<ConnectionId, NoteId>>,
	next_connection_id: AtomicU64,
}

impl Gateway {
	/// `cookie_validator` is required explicitly rather than defaulted, so a
	/// production deployment cannot forget it — pass
	/// `Arc::new(NullCookieValidator)` only if that tradeoff is understood.
	pub fn new(
		note_service: Arc<dyn NoteService>,
		session_service: Arc<dyn SessionService>,
		user_service: Arc<dyn UserService>,
		permissions_service: Arc<dyn PermissionsService>,
		cookie_validator: Arc<dyn CookieValidator>,
	) -> Arc<Gateway> {
		Arc::new(Gateway {
			note_service,
			session_service,
			user_service,
			permissions_service,
			cookie_validator,
			sessions: Mutex::new(HashMap::new()),
			creation_locks: Mutex::new(HashMap::new()),
			connections: Mutex::new(HashMap::new()),
			next_connection_id: AtomicU64::new(1),
		})
	}

	/// Runs the §4.5/§6 connect sequence: cookie → session id → username →
	/// user → note resolution → permission check → session attach. Any
	/// failure returns before a `Connection` is created; the caller closes
	/// the transport per the mapping in §7.
	pub async fn connect(
		self: &Arc<Self>,
		raw_cookie: &str,
		url_path: &str,
		sender: OutboundSender,
	) -> ClResult<(ConnectionId, Arc<NoteSession>)> {
		let session_id = self.cookie_validator.validate(raw_cookie)?;
		let username = self.session_service.username_for(&session_id).await?;
		let user = self.user_service.by_name(&username).await?;
		let note_id = self.note_service.resolve(url_path).await?;

		if !self.permissions_service.may_read(&user, &note_id).await? {
			info!("permission denied: user={} note={}", user.username, note_id);
			return Err(Error::PermissionDenied);
		}

		let session = self.get_or_create(&note_id).await?;
		let connection_id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
		session.attach(Connection::new(connection_id, sender));

		let mut connections = self.connections.lock().unwrap_or_else(|p| p.into_inner());
		connections.insert(connection_id, note_id);

		Ok((connection_id, session))
	}

	/// Returns the existing session for `note_id`, or builds one from
	/// `NoteService::content`, fetched at most once even under concurrent
	/// callers.
	pub async fn get_or_create(self: &Arc<Self>, note_id: &NoteId) -> ClResult<Arc<NoteSession>> {
		if let Some(session) = self.lookup(note_id) {
			return Ok(session);
		}

		let creation_lock = {
			let mut locks = self.creation_locks.lock().unwrap_or_else(|p| p.into_inner());
			locks.entry(note_id.clone()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
		};
		let _guard = creation_lock.lock().await;

		// Re-check: a waiter that lost the race to acquire `_guard` above
		// finds the session already installed by the winner.
		if let Some(session) = self.lookup(note_id) {
			return Ok(session);
		}

		let content = self.note_service.content(note_id).await?;
		let session = NoteSession::new(note_id.clone(), &content);

		let gateway_weak = Arc::downgrade(self);
		let destroyed_note_id = note_id.clone();
		session.on_empty(move || {
			if let Some(gateway) = gateway_weak.upgrade() {
				let mut sessions = gateway.sessions.lock().unwrap_or_else(|p| p.into_inner());
				sessions.remove(&destroyed_note_id);
				debug!("session destroyed for {}", destroyed_note_id);
			}
		});

		let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
		sessions.insert(note_id.clone(), session.clone());
		Ok(session)
	}

	fn lookup(&self, note_id: &NoteId) -> Option<Arc<NoteSession>> {
		self.sessions.lock().unwrap_or_else(|p| p.into_inner()).get(note_id).cloned()
	}

	/// Decodes `frame` and routes it to the connection's session. Frames for
	/// a connection with no session entry are silently dropped (the
	/// connection may be mid-teardown).
	pub fn dispatch(&self, connection_id: ConnectionId, frame: &[u8]) -> ClResult<()> {
		let Some(note_id) = self.note_id_of(connection_id) else {
			return Ok(());
		};
		let Some(session) = self.lookup(&note_id) else {
			return Ok(());
		};
		let (message_type, payload) = decode_frame(frame)?;
		session.route_frame(connection_id, message_type, payload)
	}

	/// Detaches `connection_id` from its session, destroying the session if
	/// it was the last connection attached.
	pub fn disconnect(&self, connection_id: ConnectionId) {
		let note_id = {
			let mut connections = self.connections.lock().unwrap_or_else(|p| p.into_inner());
			connections.remove(&connection_id)
		};
		let Some(note_id) = note_id else {
			return;
		};
		if let Some(session) = self.lookup(&note_id) {
			session.detach(connection_id);
		}
	}

	fn note_id_of(&self, connection_id: ConnectionId) -> Option<NoteId> {
		self.connections.lock().unwrap_or_else(|p| p.into_inner()).get(&connection_id).cloned()
	}

	pub fn session_count(&self) -> usize {
		self.sessions.lock().unwrap_or_else(|p| p.into_inner()).len()
	}
}
