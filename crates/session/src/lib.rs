//! Transfer-session lifecycle for library items.
//!
//! This crate holds the **client-side logic** of the transfer-session
//! protocol. It has no vendor dependencies: the embedding application
//! provides a [`SessionService`] bound to its authenticated client and a
//! [`Transport`](itemxfer_transfer::Transport) for the bytes.
//!
//! # Workflows
//!
//! - [`UploadWorkflow`]: local files and PULL URIs into one item
//! - [`ArchiveStreamUploader`]: every member of a tar/OVA stream into one item
//! - [`DownloadWorkflow`]: every file of an item into a local directory
//! - [`TransferOrchestrator`]: several of the above, concurrently
//!
//! Every workflow deletes its session exactly once before returning, and
//! cancels it first if anything failed.

pub mod archive;
pub mod client;
pub mod download;
pub mod error;
pub mod orchestrator;
pub mod poll;
pub mod service;
pub mod types;
pub mod upload;

// Re-export primary types for convenience.
pub use archive::ArchiveStreamUploader;
pub use client::SessionClient;
pub use download::DownloadWorkflow;
pub use error::{
    CleanupError, CleanupStep, FileFailure, ServiceError, ServiceErrorKind, SessionError,
    WorkflowError,
};
pub use orchestrator::{JobResult, TransferJob, TransferOrchestrator};
pub use poll::{MIN_INTERVAL, PollError, PollPolicy, poll_until};
pub use service::{ServiceFuture, SessionService};
pub use types::{DownloadOutcome, DownloadedFile, TransferEvent, UploadOutcome, UploadedFile};
pub use upload::{UploadRequest, UploadSource, UploadWorkflow};
