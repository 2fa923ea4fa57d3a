//! Re-exports `quill_core`'s error type. This crate has no JSON API surface
//! to translate errors into — a connect failure closes the transport
//! directly (§6/§9) rather than returning a structured response, so there is
//! no `IntoResponse` impl here.

pub use quill_core::error::{ClResult, Error};

// vim: ts=4
