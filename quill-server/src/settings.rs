//! Runtime configuration (§10.4). Scaled down from the host project's
//! dynamic settings registry: there is no admin API in this core, so a
//! plain env-loaded struct is enough.

use std::time::Duration;

use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Settings {
	pub listen: Box<str>,
	pub connect_timeout: Duration,
	pub cookie_name: Box<str>,
}

impl Settings {
	pub fn from_env() -> ClResult<Settings> {
		Settings::resolve(
			std::env::var("QUILL_LISTEN").ok(),
			std::env::var("QUILL_COOKIE_NAME").ok(),
			std::env::var("QUILL_CONNECT_TIMEOUT_SECS").ok(),
		)
	}

	/// Pure resolution step, kept separate from `from_env` so tests can check
	/// defaulting and parsing without touching the process environment.
	fn resolve(listen: Option<String>, cookie_name: Option<String>, connect_timeout_secs: Option<String>) -> ClResult<Settings> {
		let connect_timeout_secs: u64 = match connect_timeout_secs {
			Some(raw) => raw.parse().map_err(|_| Error::Internal("QUILL_CONNECT_TIMEOUT_SECS is not a number".into()))?,
			None => 5,
		};

		Ok(Settings {
			listen: listen.unwrap_or_else(|| "127.0.0.1:8787".to_string()).into(),
			cookie_name: cookie_name.unwrap_or_else(|| "HEDGEDOC_SESSION".to_string()).into(),
			connect_timeout: Duration::from_secs(connect_timeout_secs),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_when_unset() {
		let settings = Settings::resolve(None, None, None).expect("defaults parse");
		assert_eq!(&*settings.listen, "127.0.0.1:8787");
		assert_eq!(&*settings.cookie_name, "HEDGEDOC_SESSION");
		assert_eq!(settings.connect_timeout, Duration::from_secs(5));
	}

	#[test]
	fn rejects_non_numeric_timeout() {
		let result = Settings::resolve(None, None, Some("soon".to_string()));
		assert!(matches!(result, Err(Error::Internal(_))));
	}
}

// vim: ts=4
