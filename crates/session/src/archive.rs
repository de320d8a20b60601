//! Archive-to-session fan-out.
//!
//! Each member of a read-once tar stream (an OVA, typically) becomes one
//! PUSH file of a single upload session. A member's bytes go straight from
//! the stream into its PUT, bounded to the member's size, and the cursor
//! must sit on the next header afterwards. Missing files reported by the
//! final validation are a content error here: there is no second source
//! to fetch them from.

use std::path::Path;

use itemxfer_protocol::{AddFileSpec, ClientToken, SessionDirection, ValidationResult};
use itemxfer_transfer::{TarStreamReader, Transport};
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::SessionClient;
use crate::error::{SessionError, WorkflowError};
use crate::service::SessionService;
use crate::types::{EventSink, TransferEvent, UploadOutcome, UploadedFile};
use crate::upload::check_cancelled;

/// Streams archive members into one upload session.
pub struct ArchiveStreamUploader<'a> {
    service: &'a dyn SessionService,
    transport: &'a dyn Transport,
    cancel: CancellationToken,
    events: EventSink,
}

impl<'a> ArchiveStreamUploader<'a> {
    pub fn new(service: &'a dyn SessionService, transport: &'a dyn Transport) -> Self {
        Self {
            service,
            transport,
            cancel: CancellationToken::new(),
            events: EventSink::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events_tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events = EventSink::new(events_tx);
        self
    }

    /// Opens a local archive file and uploads its members.
    pub async fn upload_file(
        &self,
        item_id: &str,
        path: &Path,
    ) -> Result<UploadOutcome, WorkflowError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(SessionError::from)?;
        debug!(item = %item_id, archive = %path.display(), "archive opened");
        self.upload(item_id, BufReader::new(file), Some(ClientToken::generate()))
            .await
    }

    /// Uploads every member of `archive`, in order, then validates and
    /// commits the session.
    pub async fn upload<R>(
        &self,
        item_id: &str,
        archive: R,
        client_token: Option<ClientToken>,
    ) -> Result<UploadOutcome, WorkflowError>
    where
        R: AsyncRead + Unpin + Send,
    {
        check_cancelled(&self.cancel)?;
        let mut client =
            SessionClient::create(self.service, SessionDirection::Upload, item_id, client_token)
                .await?;
        let session_id = client.session_id().to_string();
        self.events.emit(TransferEvent::SessionCreated {
            item_id: item_id.to_string(),
            session_id: session_id.clone(),
            direction: SessionDirection::Upload,
        });

        let mut archive = TarStreamReader::new(archive);
        let result = self.drive(&mut client, &mut archive).await;
        let ((files, validation), cleanup_error) = client.finish(result).await?;

        let outcome = UploadOutcome {
            item_id: item_id.to_string(),
            session_id,
            files,
            validation,
            cleanup_error,
        };
        info!(
            session = %outcome.session_id,
            item = %outcome.item_id,
            members = outcome.files.len(),
            bytes = outcome.bytes(),
            "archive upload finished"
        );
        Ok(outcome)
    }

    async fn drive<R>(
        &self,
        client: &mut SessionClient<'_>,
        archive: &mut TarStreamReader<R>,
    ) -> Result<(Vec<UploadedFile>, ValidationResult), SessionError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut files = Vec::new();

        loop {
            check_cancelled(&self.cancel)?;
            let Some(entry) = archive
                .next_entry()
                .await
                .map_err(|e| SessionError::transport("archive", e))?
            else {
                break;
            };

            let spec = AddFileSpec::push(&entry.name).with_size(entry.size);
            let info = client.add_file(&spec).await?;
            self.events.emit(TransferEvent::FileStarted {
                session_id: client.session_id().to_string(),
                file: entry.name.clone(),
            });

            let mut reader = archive
                .entry_reader()
                .map_err(|e| SessionError::transport(&entry.name, e))?;
            let sent = client
                .upload_file(self.transport, &info, &mut reader, Some(entry.size))
                .await?;
            archive
                .finish_entry()
                .await
                .map_err(|e| SessionError::transport(&entry.name, e))?;

            debug!(
                session = %client.session_id(),
                member = %entry.name,
                bytes = sent,
                next_header = archive.position(),
                "archive member uploaded"
            );
            self.events.emit(TransferEvent::FileFinished {
                session_id: client.session_id().to_string(),
                file: entry.name.clone(),
                bytes: sent,
            });
            files.push(UploadedFile {
                name: entry.name,
                bytes: Some(sent),
            });
        }

        if files.is_empty() {
            return Err(SessionError::Empty);
        }

        check_cancelled(&self.cancel)?;
        let validation = client.validate().await?;
        self.events.emit(TransferEvent::Validated {
            session_id: client.session_id().to_string(),
            result: validation.clone(),
        });
        if !validation.is_clean() {
            return Err(SessionError::Validation(validation));
        }

        client.complete().await?;
        Ok((files, validation))
    }
}
