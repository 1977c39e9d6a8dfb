//! Wire-level types shared by every strata transport: the JSON response
//! envelope, the error taxonomy with its HTTP status mapping, pagination
//! cursors, and the bridge client that encodes dispatched calls as JSON
//! requests against a sibling node.

pub mod client;
pub mod cursor;
pub mod envelope;
pub mod error;

pub use client::{BridgeClient, CallResult};
pub use cursor::Cursor;
pub use envelope::{Envelope, Meta, Pagination};
pub use error::{Error, ErrorKind};

/// HTTP verbs a bridge method may be bound to.
///
/// The registry only admits this closed set; anything else is a
/// registration-time failure, not a runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
        }
    }

    /// Whether requests with this verb carry a JSON body.
    pub fn has_body(&self) -> bool {
        matches!(self, Verb::Post | Verb::Put)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
