use std::fmt;

use serde::{Deserialize, Serialize};

/// Which way bytes flow for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionDirection {
    /// Bytes flow into the library item (update session).
    Upload,
    /// Bytes flow out of the library item (download session).
    Download,
}

impl fmt::Display for SessionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Download => f.write_str("download"),
        }
    }
}

/// Client-side lifecycle state of a transfer session.
///
/// ```text
/// CREATED -> FILES_REGISTERED <-> UPLOADING
///                |
///                +-> VALIDATED -> COMPLETED -> DELETED
///                +-> AWAITING_PREPARATION -> COMPLETED
/// any non-terminal state -> CANCELED -> DELETED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    FilesRegistered,
    /// A PUT is in flight for one of the session's files.
    Uploading,
    /// Download files are being staged by the server.
    AwaitingPreparation,
    Validated,
    Completed,
    Canceled,
    Deleted,
}

impl SessionState {
    /// `true` once the session reached an outcome (or was released).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Deleted)
    }

    /// `true` if new file descriptors may be registered.
    pub fn accepts_files(self) -> bool {
        matches!(self, Self::Created | Self::FilesRegistered)
    }

    /// Returns whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Created, FilesRegistered) => true,
            (FilesRegistered, FilesRegistered | Uploading | AwaitingPreparation | Validated) => {
                true
            }
            (Uploading, FilesRegistered) => true,
            (AwaitingPreparation, AwaitingPreparation | Completed) => true,
            (Validated, Validated | Completed) => true,
            (Completed | Canceled, Deleted) => true,
            (from, Canceled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::FilesRegistered => "FILES_REGISTERED",
            Self::Uploading => "UPLOADING",
            Self::AwaitingPreparation => "AWAITING_PREPARATION",
            Self::Validated => "VALIDATED",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Idempotency key for `create`.
///
/// Re-sending the same token after a transient failure must return the
/// session created by the first attempt instead of a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(String);

impl ClientToken {
    /// Generates a random (UUID v4) token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned session identifier tagged with its direction.
///
/// Cancel and delete exist for both directions; the tag lets a service
/// adapter route them to the right remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: String,
    pub direction: SessionDirection,
}

impl SessionHandle {
    pub fn new(session_id: impl Into<String>, direction: SessionDirection) -> Self {
        Self {
            session_id: session_id.into(),
            direction,
        }
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.direction, self.session_id)
    }
}

/// Rejected lifecycle edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// One in-flight bulk operation against a single library item.
///
/// Owned exclusively by the workflow that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSession {
    handle: SessionHandle,
    item_id: String,
    state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_token: Option<ClientToken>,
    #[serde(default)]
    cancel_attempted: bool,
}

impl TransferSession {
    /// Wraps a freshly created session (state `CREATED`).
    pub fn new(handle: SessionHandle, item_id: impl Into<String>, client_token: Option<ClientToken>) -> Self {
        Self {
            handle,
            item_id: item_id.into(),
            state: SessionState::Created,
            client_token,
            cancel_attempted: false,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn session_id(&self) -> &str {
        &self.handle.session_id
    }

    pub fn direction(&self) -> SessionDirection {
        self.handle.direction
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_token(&self) -> Option<&ClientToken> {
        self.client_token.as_ref()
    }

    /// `true` once a cancel has been sent, whether or not it succeeded.
    pub fn cancel_attempted(&self) -> bool {
        self.cancel_attempted
    }

    pub fn mark_cancel_attempted(&mut self) {
        self.cancel_attempted = true;
    }

    /// Moves to `next` if the lifecycle graph allows it.
    pub fn transition(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if self.state.can_transition_to(next) {
            self.state = next;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    /// Whether the mandatory final delete may be issued now.
    ///
    /// Allowed from COMPLETED or CANCELED, and after a cancel attempt that
    /// failed remotely (the delete is still owed).
    pub fn can_delete(&self) -> bool {
        matches!(self.state, SessionState::Completed | SessionState::Canceled)
            || (self.cancel_attempted && self.state != SessionState::Deleted)
    }

    /// Records the delete. Bypasses the graph for the failed-cancel case.
    pub fn mark_deleted(&mut self) {
        self.state = SessionState::Deleted;
    }
}
