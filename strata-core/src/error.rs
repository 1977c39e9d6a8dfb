//! Error currency for the whole system.
//!
//! One error type flows from method bodies through the dispatcher to every
//! transport; the wire crate owns it because the kind → HTTP status mapping
//! is a wire concern.

pub use strata_http::{Error, ErrorKind};
