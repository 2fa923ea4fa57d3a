//! Route wiring. A single realtime endpoint (§6): everything else this core
//! depends on is reached through the collaborator traits, not HTTP.

use axum::routing::any;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::prelude::*;
use crate::websocket;

pub fn init(app: App) -> Router {
	Router::new()
		.route("/realtime/{*note_path}", any(websocket::get_realtime))
		.layer(TraceLayer::new_for_http())
		.with_state(app)
}

// vim: ts=4
