//! Gateway/session-lifecycle integration tests against fake in-memory
//! collaborator adapters — covers the concurrent-create, disconnect, and
//! permission-check invariants from §8/S5/S6 that span `Gateway` and
//! `NoteSession` together rather than one unit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use quill_core::prelude::*;
use quill_core::services::{CookieValidator, NoteService, PermissionsService, SessionService, UserService};
use quill_crdt::{outbound_channel, Gateway};

#[derive(Debug)]
struct FakeNotes {
	content: String,
	fetch_count: Arc<AtomicU64>,
	delay: Duration,
}

#[async_trait]
impl NoteService for FakeNotes {
	async fn resolve(&self, url_path: &str) -> ClResult<NoteId> {
		Ok(NoteId::from(url_path))
	}

	async fn content(&self, _note: &NoteId) -> ClResult<String> {
		self.fetch_count.fetch_add(1, Ordering::SeqCst);
		sleep(self.delay).await;
		Ok(self.content.clone())
	}
}

#[derive(Debug)]
struct FakeSessions;

#[async_trait]
impl SessionService for FakeSessions {
	async fn username_for(&self, session_id: &str) -> ClResult<String> {
		Ok(session_id.to_string())
	}
}

#[derive(Debug)]
struct FakeUsers;

#[async_trait]
impl UserService for FakeUsers {
	async fn by_name(&self, username: &str) -> ClResult<User> {
		Ok(User { username: username.into(), display_name: username.into() })
	}
}

#[derive(Debug)]
struct AllowAll;

#[async_trait]
impl PermissionsService for AllowAll {
	async fn may_read(&self, _user: &User, _note: &NoteId) -> ClResult<bool> {
		Ok(true)
	}
}

#[derive(Debug)]
struct DenyAll;

#[async_trait]
impl PermissionsService for DenyAll {
	async fn may_read(&self, _user: &User, _note: &NoteId) -> ClResult<bool> {
		Ok(false)
	}
}

#[derive(Debug, Default)]
struct NullValidator;

impl CookieValidator for NullValidator {
	fn validate(&self, raw: &str) -> ClResult<String> {
		Ok(raw.to_string())
	}
}

fn test_gateway(content: &str, delay: Duration, fetch_count: Arc<AtomicU64>) -> Arc<Gateway> {
	Gateway::new(
		Arc::new(FakeNotes { content: content.to_string(), fetch_count, delay }),
		Arc::new(FakeSessions),
		Arc::new(FakeUsers),
		Arc::new(AllowAll),
		Arc::new(NullValidator),
	)
}

/// Invariant 1 / scenario S6: 50 concurrent connects to a brand new note,
/// with a 20ms artificial delay in `NoteService::content`, share one
/// session and trigger exactly one content fetch.
#[tokio::test]
async fn concurrent_connects_share_one_session_and_one_fetch() {
	let fetch_count = Arc::new(AtomicU64::new(0));
	let gateway = test_gateway("hello", Duration::from_millis(20), fetch_count.clone());

	let mut handles = Vec::new();
	for _ in 0..50 {
		let gateway = gateway.clone();
		handles.push(tokio::spawn(async move {
			let (tx, _rx) = outbound_channel();
			gateway.connect("session-id", "note-1", tx).await.expect("connect")
		}));
	}

	let mut sessions = Vec::new();
	for handle in handles {
		let (_id, session) = handle.await.expect("task");
		sessions.push(session);
	}

	assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
	assert_eq!(gateway.session_count(), 1);
	for session in &sessions {
		assert!(Arc::ptr_eq(session, &sessions[0]));
	}
	assert_eq!(sessions[0].connection_count(), 50);
}

/// Invariant 2 / scenario S5: after the last connection detaches, the
/// session is unlinked from the registry.
#[tokio::test]
async fn disconnecting_last_connection_removes_session_from_registry() {
	let gateway = test_gateway("hello", Duration::from_millis(0), Arc::new(AtomicU64::new(0)));
	let (tx, _rx) = outbound_channel();
	let (connection_id, _session) = gateway.connect("session-id", "note-1", tx).await.expect("connect");

	assert_eq!(gateway.session_count(), 1);
	gateway.disconnect(connection_id);
	assert_eq!(gateway.session_count(), 0);
}

#[tokio::test]
async fn permission_denied_rejects_connect() {
	let gateway = Gateway::new(
		Arc::new(FakeNotes { content: "x".into(), fetch_count: Arc::new(AtomicU64::new(0)), delay: Duration::from_millis(0) }),
		Arc::new(FakeSessions),
		Arc::new(FakeUsers),
		Arc::new(DenyAll),
		Arc::new(NullValidator),
	);
	let (tx, _rx) = outbound_channel();
	let result = gateway.connect("session-id", "note-1", tx).await;
	assert!(matches!(result, Err(Error::PermissionDenied)));
}
