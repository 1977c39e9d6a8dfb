/// The kinds of failure a dispatched call can report.
///
/// Kinds, not identifiers: every error carries a human-readable message and
/// exactly one kind, and the kind alone decides the HTTP status code on the
/// bridge and the process exit code on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Validation failure, unparseable params, conflicting inputs.
    BadRequest,
    /// Unknown method, dataset reference, or profile.
    NotFound,
    /// Missing, malformed, or expired token on a protected call.
    Unauthorized,
    /// Attempted RPC on a method with no registered endpoint.
    UnsupportedTransport,
    /// Non-forced save with no changes, dirty linked directory, and friends.
    Conflict,
    /// An external subsystem failed (storage, network, registry).
    Dependency,
    /// Invariant breach in registration or dispatch.
    Internal,
}

impl ErrorKind {
    /// HTTP status code the bridge writes for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::UnsupportedTransport => 405,
            ErrorKind::Conflict => 409,
            ErrorKind::Dependency | ErrorKind::Internal => 500,
        }
    }

    /// Inverse of [`status_code`](Self::status_code), used by the bridge
    /// client to reconstitute an error from a response.
    ///
    /// `Dependency` is not distinguishable from `Internal` on the wire; both
    /// come back as `Internal`.
    pub fn from_status(code: u16) -> ErrorKind {
        match code {
            400 => ErrorKind::BadRequest,
            401 => ErrorKind::Unauthorized,
            404 => ErrorKind::NotFound,
            405 | 501 => ErrorKind::UnsupportedTransport,
            409 => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }
}

/// Error type returned by every dispatched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedTransport, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}
