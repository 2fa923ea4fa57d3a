use std::sync::Arc;

use quill_core::services::NullCookieValidator;
use quill_server::adapters::{AllowAllPermissions, InMemoryNotes, InMemorySessions, InMemoryUsers};
use quill_server::settings::Settings;
use quill_server::{build_app, run};

#[tokio::main]
async fn main() -> quill_core::error::ClResult<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let settings = Settings::from_env()?;

	let sessions = Arc::new(InMemorySessions::new());
	sessions.insert("demo-session", "demo-user");
	let notes = Arc::new(InMemoryNotes::new([("demo-note", "# Welcome\n\nStart typing.")]));

	let app = build_app(
		settings,
		notes,
		sessions,
		Arc::new(InMemoryUsers::new()),
		Arc::new(AllowAllPermissions),
		Arc::new(NullCookieValidator),
	);

	run(app).await
}

// vim: ts=4
