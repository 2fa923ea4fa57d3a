//! Shared value types for the Quill realtime note collaboration core.
//!
//! Kept free of I/O so it compiles fast and in parallel with everything
//! that depends on it.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod types;

pub use types::{NoteId, Note, Timestamp, User};

// vim: ts=4
