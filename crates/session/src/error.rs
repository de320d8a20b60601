//! Session error types.

use std::fmt;
use std::time::Duration;

use itemxfer_protocol::{SessionState, ValidationResult};
use itemxfer_transfer::TransferError;

/// Classification of a failure reported by the remote session service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// The session (or file) does not exist, e.g. already deleted.
    NotFound,
    /// The server rejected the call for the session's current state.
    InvalidState,
    /// Transient: connection lost, service busy.
    Unavailable,
    Other,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::InvalidState => f.write_str("invalid state"),
            Self::Unavailable => f.write_str("unavailable"),
            Self::Other => f.write_str("service error"),
        }
    }
}

/// Failure reported by a [`SessionService`](crate::SessionService).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Unavailable, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ServiceErrorKind::NotFound
    }
}

/// Errors produced while driving a transfer session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {session} is {state}, cannot {operation}")]
    InvalidState {
        session: String,
        state: SessionState,
        operation: &'static str,
    },

    #[error("validation failed: {0}")]
    Validation(ValidationResult),

    #[error("transfer of {file} failed: {source}")]
    Transport {
        file: String,
        #[source]
        source: TransferError,
    },

    #[error("preparation of {file} failed: {message}")]
    Preparation { file: String, message: String },

    #[error("{operation} failed: {source}")]
    Service {
        operation: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("{file} not ready after {waited:?}")]
    Timeout { file: String, waited: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error("nothing to transfer")]
    Empty,

    #[error("{} file(s) failed: {}", .0.len(), list_failures(.0))]
    FilesFailed(Vec<FileFailure>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub(crate) fn service(operation: &'static str, source: ServiceError) -> Self {
        Self::Service { operation, source }
    }

    pub(crate) fn transport(file: impl Into<String>, source: TransferError) -> Self {
        Self::Transport {
            file: file.into(),
            source,
        }
    }
}

/// One failed file of a multi-file download.
#[derive(Debug)]
pub struct FileFailure {
    pub name: String,
    pub error: SessionError,
}

fn list_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.name, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cleanup call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    Cancel,
    Delete,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => f.write_str("cancel"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A failed `cancel` or `delete`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{step} of session {session} failed: {source}")]
pub struct CleanupError {
    pub step: CleanupStep,
    pub session: String,
    #[source]
    pub source: ServiceError,
}

/// Error returned by every workflow entry point.
///
/// `primary` is what broke the transfer. `cleanup` lists cancel/delete
/// failures that happened afterwards; they never replace `primary`.
/// `session_id` is set once a remote session existed.
#[derive(Debug)]
pub struct WorkflowError {
    pub primary: SessionError,
    pub cleanup: Vec<CleanupError>,
    pub session_id: Option<String>,
}

impl WorkflowError {
    pub fn primary(&self) -> &SessionError {
        &self.primary
    }

    /// Session that was canceled and released, if one had been created.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn cleanup_errors(&self) -> &[CleanupError] {
        &self.cleanup
    }

    pub fn into_primary(self) -> SessionError {
        self.primary
    }
}

impl From<SessionError> for WorkflowError {
    fn from(primary: SessionError) -> Self {
        Self {
            primary,
            cleanup: Vec::new(),
            session_id: None,
        }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.cleanup.is_empty() {
            let cleanup: Vec<String> = self.cleanup.iter().map(ToString::to_string).collect();
            write!(f, "; cleanup also failed: {}", cleanup.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_shows_primary_first() {
        let err = WorkflowError {
            primary: SessionError::transport(
                "disk.vmdk",
                TransferError::Status {
                    status: 503,
                    url: "https://vc/u".into(),
                },
            ),
            cleanup: vec![CleanupError {
                step: CleanupStep::Delete,
                session: "s-1".into(),
                source: ServiceError::unavailable("connection reset"),
            }],
            session_id: Some("s-1".into()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("transfer of disk.vmdk failed"));
        assert!(msg.contains("cleanup also failed: delete of session s-1 failed"));
        assert!(matches!(err.primary(), SessionError::Transport { .. }));
    }

    #[test]
    fn workflow_error_without_cleanup() {
        let err = WorkflowError::from(SessionError::Cancelled);
        assert_eq!(err.to_string(), "cancelled");
        assert!(err.cleanup_errors().is_empty());
        assert_eq!(err.session_id(), None);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "cancelled");
    }

    #[test]
    fn files_failed_lists_names() {
        let err = SessionError::FilesFailed(vec![
            FileFailure {
                name: "a.vmdk".into(),
                error: SessionError::Preparation {
                    file: "a.vmdk".into(),
                    message: "disk busy".into(),
                },
            },
            FileFailure {
                name: "b.vmdk".into(),
                error: SessionError::Cancelled,
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 file(s) failed"));
        assert!(msg.contains("a.vmdk (preparation of a.vmdk failed: disk busy)"));
        assert!(msg.contains("b.vmdk (cancelled)"));
    }

    #[test]
    fn service_error_kind() {
        assert!(ServiceError::not_found("gone").is_not_found());
        assert!(!ServiceError::unavailable("busy").is_not_found());
        assert_eq!(
            ServiceError::not_found("session s-1").to_string(),
            "not found: session s-1"
        );
    }
}
