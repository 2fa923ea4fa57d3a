//! In-memory reference implementations of the collaborator traits, for
//! local/dev use (§10.1). A real deployment swaps these for adapters backed
//! by the host application's actual note store, session store, and ACL
//! engine — these exist so the binary runs standalone out of the box.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use quill_core::prelude::*;
use quill_core::services::{NoteService, PermissionsService, SessionService, UserService};

/// Notes keyed by URL path, seeded at construction and never written back to
/// — this core only ever reads `content` once, at session creation.
#[derive(Debug)]
pub struct InMemoryNotes {
	notes: HashMap<Box<str>, Box<str>>,
}

impl InMemoryNotes {
	pub fn new(notes: impl IntoIterator<Item = (impl Into<Box<str>>, impl Into<Box<str>>)>) -> InMemoryNotes {
		InMemoryNotes { notes: notes.into_iter().map(|(path, content)| (path.into(), content.into())).collect() }
	}
}

#[async_trait]
impl NoteService for InMemoryNotes {
	async fn resolve(&self, url_path: &str) -> ClResult<NoteId> {
		if self.notes.contains_key(url_path) {
			Ok(NoteId::from(url_path))
		} else {
			Err(Error::ResolveFailed(format!("no note at {url_path}")))
		}
	}

	async fn content(&self, note: &NoteId) -> ClResult<String> {
		self.notes
			.get(note.as_str())
			.map(|content| content.to_string())
			.ok_or_else(|| Error::ResolveFailed(format!("no note {note}")))
	}
}

/// Session id -> username, as if decoded from an opaque session store.
#[derive(Debug, Default)]
pub struct InMemorySessions {
	sessions: Mutex<HashMap<Box<str>, Box<str>>>,
}

impl InMemorySessions {
	pub fn new() -> InMemorySessions {
		InMemorySessions::default()
	}

	pub fn insert(&self, session_id: impl Into<Box<str>>, username: impl Into<Box<str>>) {
		let mut sessions = self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		sessions.insert(session_id.into(), username.into());
	}
}

#[async_trait]
impl SessionService for InMemorySessions {
	async fn username_for(&self, session_id: &str) -> ClResult<String> {
		let sessions = self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		sessions
			.get(session_id)
			.map(|username| username.to_string())
			.ok_or_else(|| Error::AuthRejected(format!("unknown session {session_id}")))
	}
}

/// Username -> `User`, trivially derived (display name == username).
#[derive(Debug, Default)]
pub struct InMemoryUsers {
	known: Mutex<HashMap<Box<str>, User>>,
}

impl InMemoryUsers {
	pub fn new() -> InMemoryUsers {
		InMemoryUsers::default()
	}

	pub fn insert(&self, user: User) {
		let mut known = self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		known.insert(user.username.clone(), user);
	}
}

#[async_trait]
impl UserService for InMemoryUsers {
	async fn by_name(&self, username: &str) -> ClResult<User> {
		let known = self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		match known.get(username) {
			Some(user) => Ok(user.clone()),
			None => Ok(User { username: username.into(), display_name: username.into() }),
		}
	}
}

/// Grants read access to every authenticated user. A real deployment
/// replaces this with an adapter consulting its own sharing/ACL model.
#[derive(Debug, Default)]
pub struct AllowAllPermissions;

#[async_trait]
impl PermissionsService for AllowAllPermissions {
	async fn may_read(&self, _user: &User, _note: &NoteId) -> ClResult<bool> {
		Ok(true)
	}
}

// vim: ts=4
