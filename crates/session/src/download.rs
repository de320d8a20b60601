//! Download workflow: list, prepare, poll, fetch.
//!
//! Files are handled one at a time. A file whose preparation ends in
//! ERROR, times out, or fails to transfer is recorded and its siblings are
//! still attempted; the workflow then fails with every recorded failure.
//! Cancellation stops the whole session.

use std::path::{Path, PathBuf};

use itemxfer_protocol::{ClientToken, DownloadFileInfo, EndpointType, SessionDirection};
use itemxfer_settings::{DownloadEndpointKind, DownloadSettings};
use itemxfer_transfer::{Transport, resolve_local_path};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::SessionClient;
use crate::error::{FileFailure, SessionError, WorkflowError};
use crate::poll::PollPolicy;
use crate::service::SessionService;
use crate::types::{DownloadOutcome, DownloadedFile, EventSink, TransferEvent};
use crate::upload::check_cancelled;

/// Runs download sessions against one service and transport.
pub struct DownloadWorkflow<'a> {
    service: &'a dyn SessionService,
    transport: &'a dyn Transport,
    settings: DownloadSettings,
    poll: PollPolicy,
    cancel: CancellationToken,
    events: EventSink,
}

impl<'a> DownloadWorkflow<'a> {
    pub fn new(service: &'a dyn SessionService, transport: &'a dyn Transport) -> Self {
        Self {
            service,
            transport,
            settings: DownloadSettings::default(),
            poll: PollPolicy::default(),
            cancel: CancellationToken::new(),
            events: EventSink::default(),
        }
    }

    pub fn with_settings(mut self, settings: DownloadSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events_tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events = EventSink::new(events_tx);
        self
    }

    /// Fetches every file of `item_id` into `destination`.
    ///
    /// Each file lands at `destination/<name>`; it is written as
    /// `<name>.part` first and renamed once complete.
    pub async fn run(
        &self,
        item_id: &str,
        destination: &Path,
    ) -> Result<DownloadOutcome, WorkflowError> {
        check_cancelled(&self.cancel)?;
        let mut client = SessionClient::create(
            self.service,
            SessionDirection::Download,
            item_id,
            Some(ClientToken::generate()),
        )
        .await?;
        let session_id = client.session_id().to_string();
        self.events.emit(TransferEvent::SessionCreated {
            item_id: item_id.to_string(),
            session_id: session_id.clone(),
            direction: SessionDirection::Download,
        });

        let result = self.drive(&mut client, destination).await;
        let (files, cleanup_error) = client.finish(result).await?;

        let outcome = DownloadOutcome {
            item_id: item_id.to_string(),
            session_id,
            files,
            cleanup_error,
        };
        info!(
            session = %outcome.session_id,
            item = %outcome.item_id,
            files = outcome.files.len(),
            bytes = outcome.bytes(),
            "download finished"
        );
        Ok(outcome)
    }

    async fn drive(
        &self,
        client: &mut SessionClient<'_>,
        destination: &Path,
    ) -> Result<Vec<DownloadedFile>, SessionError> {
        let listed = client.list_files().await?;
        tokio::fs::create_dir_all(destination).await?;

        let mut downloaded = Vec::with_capacity(listed.len());
        let mut failures = Vec::new();

        for file in &listed {
            match self.fetch(client, file, destination).await {
                Ok(done) => downloaded.push(done),
                Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                Err(e) => {
                    error!(session = %client.session_id(), file = %file.name, error = %e, "file download failed");
                    failures.push(FileFailure {
                        name: file.name.clone(),
                        error: e,
                    });
                    if !self.settings.continue_on_file_error {
                        break;
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(SessionError::FilesFailed(failures));
        }

        client.mark_downloaded()?;
        Ok(downloaded)
    }

    async fn fetch(
        &self,
        client: &mut SessionClient<'_>,
        file: &DownloadFileInfo,
        destination: &Path,
    ) -> Result<DownloadedFile, SessionError> {
        check_cancelled(&self.cancel)?;
        let path = resolve_local_path(destination, &file.name)
            .map_err(|e| SessionError::transport(&file.name, e))?;

        client
            .prepare(&file.name, endpoint_type(self.settings.endpoint_type))
            .await?;
        let prepared = client
            .wait_prepared(&file.name, &self.poll, &self.cancel)
            .await?;

        self.events.emit(TransferEvent::FileStarted {
            session_id: client.session_id().to_string(),
            file: file.name.clone(),
        });

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = part_path(&path);
        let received = match self.write_part(client, &prepared, &part).await {
            Ok(received) => received,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    debug!(path = %part.display(), error = %rm, "partial file not removed");
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&part, &path).await?;

        self.events.emit(TransferEvent::FileFinished {
            session_id: client.session_id().to_string(),
            file: file.name.clone(),
            bytes: received,
        });
        Ok(DownloadedFile {
            name: file.name.clone(),
            path,
            bytes: received,
        })
    }

    async fn write_part(
        &self,
        client: &SessionClient<'_>,
        file: &DownloadFileInfo,
        part: &Path,
    ) -> Result<u64, SessionError> {
        let mut out = tokio::fs::File::create(part).await?;
        let received = client.download_file(self.transport, file, &mut out).await?;
        out.flush().await?;
        out.sync_all().await?;

        if let Some(expected) = file.size
            && expected != received
        {
            warn!(file = %file.name, expected, received, "size differs from listing");
        }
        Ok(received)
    }
}

fn endpoint_type(kind: DownloadEndpointKind) -> EndpointType {
    match kind {
        DownloadEndpointKind::Https => EndpointType::Https,
        DownloadEndpointKind::Direct => EndpointType::Direct,
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}
