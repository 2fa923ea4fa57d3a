//! Error type and collaborator interfaces for the Quill realtime note
//! collaboration core.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod error;
pub mod prelude;
pub mod services;

pub use error::{ClResult, Error};
pub use services::{
	CookieValidator, NoteService, NullCookieValidator, PermissionsService, SessionService,
	UserService,
};

// vim: ts=4
