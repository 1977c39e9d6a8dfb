use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call environment handed to every dispatch: a session id, an optional
/// bearer token, and the cancellation token governing the call.
///
/// Contexts are cheap to clone; the cancellation token is shared between
/// clones so cancelling one cancels all.
#[derive(Debug, Clone)]
pub struct Context {
    session_id: String,
    auth_token: Option<String>,
    cancel: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::child_of(&CancellationToken::new())
    }

    /// A context whose cancellation is chained to `parent`: cancelling the
    /// parent cancels this call, but not vice versa.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            session_id: Uuid::new_v4().simple().to_string(),
            auth_token: None,
            cancel: parent.child_token(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
