//! Runs several independent transfer jobs concurrently.
//!
//! Every job gets its own session and shares nothing mutable with the
//! others. One cancellation token stops all of them; each job still runs
//! its own cleanup.

use std::path::PathBuf;

use futures_util::future::join_all;
use itemxfer_settings::TransferSettings;
use itemxfer_transfer::Transport;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::archive::ArchiveStreamUploader;
use crate::download::DownloadWorkflow;
use crate::error::WorkflowError;
use crate::poll::PollPolicy;
use crate::service::SessionService;
use crate::types::{DownloadOutcome, TransferEvent, UploadOutcome};
use crate::upload::{UploadRequest, UploadWorkflow};

/// One unit of work for [`TransferOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum TransferJob {
    Upload(UploadRequest),
    /// Upload every member of a local tar/OVA file.
    Archive { item_id: String, path: PathBuf },
    Download { item_id: String, destination: PathBuf },
}

impl TransferJob {
    pub fn item_id(&self) -> &str {
        match self {
            Self::Upload(request) => &request.item_id,
            Self::Archive { item_id, .. } | Self::Download { item_id, .. } => item_id,
        }
    }
}

/// Result of one job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub item_id: String,
    pub success: bool,
    pub session_id: Option<String>,
    pub files: usize,
    pub bytes: u64,
    pub error: Option<String>,
    /// Cleanup failures, on success or failure.
    pub cleanup_errors: Vec<String>,
}

/// Coordinates independent transfer jobs.
pub struct TransferOrchestrator {
    settings: TransferSettings,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: CancellationToken,
}

impl Default for TransferOrchestrator {
    fn default() -> Self {
        Self::new(TransferSettings::default())
    }
}

impl TransferOrchestrator {
    pub fn new(settings: TransferSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            settings,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Token that cancels every running job.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs all jobs concurrently and returns one result per job, in order.
    ///
    /// A failing job does not affect the others.
    pub async fn run(
        &self,
        service: &dyn SessionService,
        transport: &dyn Transport,
        jobs: &[TransferJob],
    ) -> Vec<JobResult> {
        join_all(
            jobs.iter()
                .map(|job| self.run_single(service, transport, job)),
        )
        .await
    }

    async fn run_single(
        &self,
        service: &dyn SessionService,
        transport: &dyn Transport,
        job: &TransferJob,
    ) -> JobResult {
        let item_id = job.item_id().to_string();

        let outcome: Result<Summary, WorkflowError> = match job {
            TransferJob::Upload(request) => UploadWorkflow::new(service, transport)
                .with_settings(self.settings.upload.clone())
                .with_cancel(self.cancel.clone())
                .with_events(self.events_tx.clone())
                .run(request)
                .await
                .map(Summary::from),
            TransferJob::Archive { item_id, path } => ArchiveStreamUploader::new(service, transport)
                .with_cancel(self.cancel.clone())
                .with_events(self.events_tx.clone())
                .upload_file(item_id, path)
                .await
                .map(Summary::from),
            TransferJob::Download {
                item_id,
                destination,
            } => DownloadWorkflow::new(service, transport)
                .with_settings(self.settings.download.clone())
                .with_poll_policy(PollPolicy::from(&self.settings.poll))
                .with_cancel(self.cancel.clone())
                .with_events(self.events_tx.clone())
                .run(item_id, destination)
                .await
                .map(Summary::from),
        };

        match outcome {
            Ok(summary) => {
                let _ = self.events_tx.try_send(TransferEvent::Completed {
                    item_id: item_id.clone(),
                    session_id: summary.session_id.clone(),
                });
                info!(item = %item_id, session = %summary.session_id, files = summary.files, "job completed");

                JobResult {
                    item_id,
                    success: true,
                    session_id: Some(summary.session_id),
                    files: summary.files,
                    bytes: summary.bytes,
                    error: None,
                    cleanup_errors: summary.cleanup_error.into_iter().collect(),
                }
            }
            Err(e) => {
                let err_msg = e.to_string();
                let _ = self.events_tx.try_send(TransferEvent::Failed {
                    item_id: item_id.clone(),
                    error: err_msg.clone(),
                });
                error!(item = %item_id, error = %err_msg, "job failed");

                JobResult {
                    item_id,
                    success: false,
                    session_id: e.session_id.clone(),
                    files: 0,
                    bytes: 0,
                    error: Some(e.primary.to_string()),
                    cleanup_errors: e.cleanup.iter().map(ToString::to_string).collect(),
                }
            }
        }
    }
}

struct Summary {
    session_id: String,
    files: usize,
    bytes: u64,
    cleanup_error: Option<String>,
}

impl From<UploadOutcome> for Summary {
    fn from(o: UploadOutcome) -> Self {
        Self {
            files: o.files.len(),
            bytes: o.bytes(),
            cleanup_error: o.cleanup_error.map(|e| e.to_string()),
            session_id: o.session_id,
        }
    }
}

impl From<DownloadOutcome> for Summary {
    fn from(o: DownloadOutcome) -> Self {
        Self {
            files: o.files.len(),
            bytes: o.bytes(),
            cleanup_error: o.cleanup_error.map(|e| e.to_string()),
            session_id: o.session_id,
        }
    }
}
