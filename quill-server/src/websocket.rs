//! The single realtime transport endpoint: `/realtime/<note-path>`. Grounded
//! on the host project's WS upgrade handlers — extract, check, then either
//! `ws.on_upgrade` into the real connection loop or close with a structured
//! code, never returning an HTTP error body (§6: "transport is closed
//! without a structured error payload").

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use quill_crdt::outbound_channel;

use crate::prelude::*;

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
	raw.split(';').find_map(|pair| {
		let (key, value) = pair.trim().split_once('=')?;
		(key == name).then_some(value)
	})
}

async fn close_with_error(mut socket: WebSocket, code: u16, reason: &'static str) {
	let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
	let _ = socket.close().await;
}

fn close_code_for(error: &Error) -> (u16, &'static str) {
	match error {
		Error::AuthRejected(_) => (4401, "unauthenticated"),
		Error::PermissionDenied => (4403, "permission denied"),
		Error::ResolveFailed(_) => (4404, "note not found"),
		Error::ProtocolError(_) | Error::TransportError(_) | Error::Internal(_) => (4500, "internal error"),
	}
}

pub async fn get_realtime(
	ws: WebSocketUpgrade,
	Path(note_path): Path<String>,
	State(app): State<App>,
	headers: HeaderMap,
) -> Response {
	let Some(raw_cookie) = cookie_value(&headers, &app.settings.cookie_name) else {
		return ws.on_upgrade(|socket| close_with_error(socket, 4401, "missing session cookie"));
	};
	let raw_cookie = raw_cookie.to_string();

	ws.on_upgrade(move |socket| handle_socket(socket, app, note_path, raw_cookie))
}

async fn handle_socket(socket: WebSocket, app: App, note_path: String, raw_cookie: String) {
	let (outbound_tx, mut outbound_rx) = outbound_channel();

	let connect = app.gateway.connect(&raw_cookie, &note_path, outbound_tx);
	let (connection_id, session) = match tokio::time::timeout(app.settings.connect_timeout, connect).await {
		Ok(Ok(attached)) => attached,
		Ok(Err(error)) => {
			info!("realtime connect rejected for {}: {}", note_path, error);
			let (code, reason) = close_code_for(&error);
			return close_with_error(socket, code, reason).await;
		}
		Err(_elapsed) => {
			warn!("realtime connect for {} exceeded {:?}", note_path, app.settings.connect_timeout);
			return close_with_error(socket, 4408, "connect timed out").await;
		}
	};
	info!("attached connection {:?} to note {}", connection_id, session.note_id);

	let (mut socket_tx, mut socket_rx) = socket.split();

	let pump_out = async {
		while let Some(frame) = outbound_rx.recv().await {
			if socket_tx.send(Message::Binary(frame.into())).await.is_err() {
				break;
			}
		}
	};

	let gateway = app.gateway.clone();
	let pump_in = async move {
		while let Some(message) = socket_rx.next().await {
			match message {
				Ok(Message::Binary(bytes)) => {
					if let Err(error) = gateway.dispatch(connection_id, &bytes) {
						warn!("dropping frame from {:?}: {}", connection_id, error);
					}
				}
				Ok(Message::Close(_)) => break,
				Ok(_) => continue,
				Err(error) => {
					warn!("socket error on {:?}: {}", connection_id, error);
					break;
				}
			}
		}
	};

	tokio::select! {
		() = pump_out => {}
		() = pump_in => {}
	}

	app.gateway.disconnect(connection_id);
	info!("detached connection {:?}", connection_id);
}

// vim: ts=4
