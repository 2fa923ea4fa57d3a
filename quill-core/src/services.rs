//! Collaborator interfaces the realtime core consumes.
//!
//! None of these are implemented in this crate. `quill-server` wires in
//! concrete (currently in-memory) implementations; a production deployment
//! backs them with the note store, the session/cookie store and the
//! permission service.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

/// Initial-content and path-resolution interface for notes.
#[async_trait]
pub trait NoteService: Debug + Send + Sync {
	/// Resolve the tail of a `/realtime/<note-path>` URL to a `NoteId`.
	async fn resolve(&self, url_path: &str) -> ClResult<NoteId>;

	/// The note's current text content, used once to seed a fresh
	/// `DocumentReplica` when its session is created.
	async fn content(&self, note: &NoteId) -> ClResult<String>;
}

/// Maps a session id (extracted from the `HEDGEDOC_SESSION` cookie) to a
/// username.
#[async_trait]
pub trait SessionService: Debug + Send + Sync {
	async fn username_for(&self, session_id: &str) -> ClResult<String>;
}

/// Looks up a user record by username.
#[async_trait]
pub trait UserService: Debug + Send + Sync {
	async fn by_name(&self, username: &str) -> ClResult<User>;
}

/// Read-permission gate evaluated once per connect, before attach.
#[async_trait]
pub trait PermissionsService: Debug + Send + Sync {
	async fn may_read(&self, user: &User, note: &NoteId) -> ClResult<bool>;
}

/// Verifies the signature prefix of a `HEDGEDOC_SESSION` cookie before its
/// session id is trusted. See the design notes on cookie handling: this is a
/// pluggable validator rather than a built-in implementation, so the default
/// gateway construction is explicit about the tradeoff it is making.
pub trait CookieValidator: Debug + Send + Sync {
	/// `raw` is the full cookie value as received, including its signature
	/// prefix. Returns the session id (the portion before the first `.`)
	/// on success.
	fn validate(&self, raw: &str) -> ClResult<String>;
}

/// Accepts any syntactically well-formed cookie without verifying its
/// signature. Insecure by construction; a production `Gateway` must be
/// built with a real validator passed to `Gateway::new`.
#[derive(Debug, Default)]
pub struct NullCookieValidator;

impl CookieValidator for NullCookieValidator {
	fn validate(&self, raw: &str) -> ClResult<String> {
		// Trim the two-character signature prefix HedgeDoc's cookie-session
		// library prepends, then take everything before the first `.`.
		let unsigned = raw.get(2..).ok_or_else(|| Error::AuthRejected("cookie too short".into()))?;
		let session_id = unsigned.split('.').next().unwrap_or(unsigned);
		if session_id.is_empty() {
			return Err(Error::AuthRejected("empty session id".into()));
		}
		Ok(session_id.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn null_validator_extracts_session_id_before_dot() {
		let validator = NullCookieValidator;
		let id = validator.validate("s:abc123.signature").expect("valid cookie");
		assert_eq!(id, "abc123");
	}

	#[test]
	fn null_validator_rejects_too_short_cookie() {
		let validator = NullCookieValidator;
		assert!(validator.validate("s").is_err());
	}
}
