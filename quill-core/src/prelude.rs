pub use crate::error::{ClResult, Error};
pub use quill_types::{Note, NoteId, Timestamp, User};
pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};
