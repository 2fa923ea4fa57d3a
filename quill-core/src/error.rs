//! Error handling subsystem. Implements a custom Error type.

use crate::prelude::*;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Connect-time rejections (§7)
	AuthRejected(String),
	PermissionDenied,
	ResolveFailed(String),

	// Per-connection and per-session failures
	ProtocolError(String),
	TransportError(String),
	Internal(String),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::TransportError(err.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Self::ProtocolError(err.to_string())
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		warn!("tokio join error: {}", err);
		Self::Internal(format!("task join failed: {err}"))
	}
}

/// Helper macro for locking mutexes with automatic internal error handling.
///
/// Converts a poisoned std mutex into `Error::Internal` with a context tag.
/// Unused by the tokio-lock-based session/registry code, but kept for any
/// std-sync boundary a collaborator adapter introduces.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
