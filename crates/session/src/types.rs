//! Data types shared by the workflows.

use std::path::PathBuf;

use itemxfer_protocol::{SessionDirection, ValidationResult};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::CleanupError;

/// Progress event emitted by workflows and the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    SessionCreated {
        item_id: String,
        session_id: String,
        direction: SessionDirection,
    },
    /// Bytes for `file` start moving.
    FileStarted { session_id: String, file: String },
    FileFinished {
        session_id: String,
        file: String,
        bytes: u64,
    },
    Validated {
        session_id: String,
        result: ValidationResult,
    },
    /// A job finished and its session was released.
    Completed { item_id: String, session_id: String },
    Failed { item_id: String, error: String },
}

/// One file handled by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    /// Bytes streamed. `None` for PULL files, which the server fetches.
    pub bytes: Option<u64>,
}

/// Result of a committed upload session.
#[derive(Debug)]
pub struct UploadOutcome {
    pub item_id: String,
    pub session_id: String,
    pub files: Vec<UploadedFile>,
    /// Final (clean) validation.
    pub validation: ValidationResult,
    /// Set when the final delete failed after the commit.
    pub cleanup_error: Option<CleanupError>,
}

impl UploadOutcome {
    pub fn bytes(&self) -> u64 {
        self.files.iter().filter_map(|f| f.bytes).sum()
    }
}

/// One file written by a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Result of a fully fetched download session.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub item_id: String,
    pub session_id: String,
    pub files: Vec<DownloadedFile>,
    pub cleanup_error: Option<CleanupError>,
}

impl DownloadOutcome {
    pub fn bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }
}

/// Optional event channel. Events are dropped, never awaited, when the
/// receiver is gone or full, so a slow consumer cannot stall a transfer.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<mpsc::Sender<TransferEvent>>);

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<TransferEvent>) -> Self {
        Self(Some(tx))
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.0
            && let Err(e) = tx.try_send(event)
        {
            trace!(error = %e, "transfer event dropped");
        }
    }
}
