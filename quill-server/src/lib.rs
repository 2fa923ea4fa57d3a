//! Wires the note realtime core to a real axum server: a single WebSocket
//! route, in-memory collaborator adapters for local/dev use, and
//! `tracing-subscriber` bootstrap — see `quill_crdt` for the collaboration
//! logic itself.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use quill_core::prelude::*;
use quill_core::services::{CookieValidator, NoteService, PermissionsService, SessionService, UserService};
use quill_crdt::Gateway;

pub mod adapters;
pub mod error;
pub mod prelude;
pub mod routes;
pub mod settings;
pub mod websocket;

use settings::Settings;

pub struct AppState {
	pub settings: Settings,
	pub gateway: Arc<Gateway>,
}

pub type App = Arc<AppState>;

/// Assembles an `App` from its collaborator adapters, following the same
/// builder-free construction `Gateway::new` itself uses: required
/// dependencies are constructor arguments, not defaulted fields.
pub fn build_app(
	settings: Settings,
	note_service: Arc<dyn NoteService>,
	session_service: Arc<dyn SessionService>,
	user_service: Arc<dyn UserService>,
	permissions_service: Arc<dyn PermissionsService>,
	cookie_validator: Arc<dyn CookieValidator>,
) -> App {
	let gateway = Gateway::new(note_service, session_service, user_service, permissions_service, cookie_validator);
	Arc::new(AppState { settings, gateway })
}

pub async fn run(app: App) -> ClResult<()> {
	let listener = tokio::net::TcpListener::bind(app.settings.listen.as_ref()).await?;
	info!("Listening on {}", app.settings.listen);

	let router = routes::init(app);
	axum::serve(listener, router).await?;
	Ok(())
}

// vim: ts=4
