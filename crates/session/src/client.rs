//! Client-side state machine for one transfer session.
//!
//! `SessionClient` owns a [`TransferSession`] and is the only thing that
//! talks to the [`SessionService`] about it. Every operation checks the
//! local lifecycle state before making a remote call, so misuse is caught
//! as [`SessionError::InvalidState`] without a round trip.

use std::sync::{Mutex, PoisonError};

use itemxfer_protocol::{
    AddFileSpec, ClientToken, DownloadFileInfo, EndpointType, FileInfo, PrepareStatus,
    SessionDirection, SessionHandle, SessionState, TransferSession, ValidationResult,
};
use itemxfer_transfer::{DownloadSink, Transport, UploadSource, download_url, upload_url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{
    CleanupError, CleanupStep, ServiceError, ServiceErrorKind, SessionError, WorkflowError,
};
use crate::poll::{PollError, PollPolicy, poll_until};
use crate::service::SessionService;

/// Drives one session through its lifecycle.
pub struct SessionClient<'a> {
    service: &'a dyn SessionService,
    session: TransferSession,
}

impl<'a> SessionClient<'a> {
    /// Creates a remote session bound to `item_id`.
    pub async fn create(
        service: &'a dyn SessionService,
        direction: SessionDirection,
        item_id: &str,
        client_token: Option<ClientToken>,
    ) -> Result<Self, SessionError> {
        let session_id = service
            .create(direction, item_id, client_token.as_ref())
            .await
            .map_err(|e| SessionError::service("create", e))?;
        debug!(session = %session_id, item = %item_id, %direction, "session created");

        Ok(Self {
            service,
            session: TransferSession::new(
                SessionHandle::new(session_id, direction),
                item_id,
                client_token,
            ),
        })
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn handle(&self) -> &SessionHandle {
        self.session.handle()
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Registers a file. Only valid in CREATED or FILES_REGISTERED.
    pub async fn add_file(&mut self, spec: &AddFileSpec) -> Result<FileInfo, SessionError> {
        self.require_direction(SessionDirection::Upload, "add a file")?;
        if !self.session.state().accepts_files() {
            return Err(self.invalid_state("add a file"));
        }

        let info = self
            .service
            .add_file(self.session.session_id(), spec)
            .await
            .map_err(|e| SessionError::service("add_file", e))?;
        self.advance(SessionState::FilesRegistered, "add a file")?;

        debug!(
            session = %self.session.session_id(),
            file = %info.name,
            source = ?info.source_type,
            "file registered"
        );
        Ok(info)
    }

    /// Streams one PUSH file's bytes to its upload endpoint.
    ///
    /// The session is UPLOADING while the PUT runs and returns to
    /// FILES_REGISTERED once it succeeds. A failed PUT leaves it in
    /// UPLOADING; the caller is expected to cancel.
    pub async fn upload_file(
        &mut self,
        transport: &dyn Transport,
        file: &FileInfo,
        source: UploadSource<'_>,
        length: Option<u64>,
    ) -> Result<u64, SessionError> {
        self.require_direction(SessionDirection::Upload, "upload bytes")?;
        let url = upload_url(file).map_err(|e| SessionError::transport(&file.name, e))?;
        self.advance(SessionState::Uploading, "upload bytes")?;

        let sent = transport
            .put(&url, source, length)
            .await
            .map_err(|e| SessionError::transport(&file.name, e))?;

        self.advance(SessionState::FilesRegistered, "finish an upload")?;
        debug!(session = %self.session.session_id(), file = %file.name, bytes = sent, "file uploaded");
        Ok(sent)
    }

    /// Asks the server which files are missing or invalid.
    ///
    /// A clean result moves the session to VALIDATED. A result with errors
    /// leaves it in FILES_REGISTERED so missing files can still be added.
    pub async fn validate(&mut self) -> Result<ValidationResult, SessionError> {
        self.require_direction(SessionDirection::Upload, "validate")?;
        if !matches!(
            self.session.state(),
            SessionState::FilesRegistered | SessionState::Validated
        ) {
            return Err(self.invalid_state("validate"));
        }

        let result = self
            .service
            .validate(self.session.session_id())
            .await
            .map_err(|e| SessionError::service("validate", e))?;

        if result.is_clean() {
            self.advance(SessionState::Validated, "validate")?;
        } else {
            warn!(session = %self.session.session_id(), %result, "validation reported errors");
        }
        Ok(result)
    }

    /// Commits the upload.
    ///
    /// Runs a fresh validation unless the last one was clean, and never
    /// calls the remote `complete` while validation reports errors.
    pub async fn complete(&mut self) -> Result<(), SessionError> {
        self.require_direction(SessionDirection::Upload, "complete")?;
        if self.session.state() != SessionState::Validated {
            let result = self.validate().await?;
            if !result.is_clean() {
                return Err(SessionError::Validation(result));
            }
        }

        self.service
            .complete(self.session.session_id())
            .await
            .map_err(|e| SessionError::service("complete", e))?;
        self.advance(SessionState::Completed, "complete")?;
        info!(session = %self.session.session_id(), item = %self.session.item_id(), "session completed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------

    /// Lists the files of a download session.
    pub async fn list_files(&mut self) -> Result<Vec<DownloadFileInfo>, SessionError> {
        self.require_direction(SessionDirection::Download, "list files")?;
        let files = self
            .service
            .list_download_files(self.session.session_id())
            .await
            .map_err(|e| SessionError::service("list_download_files", e))?;
        if self.session.state() == SessionState::Created {
            self.advance(SessionState::FilesRegistered, "list files")?;
        }
        debug!(session = %self.session.session_id(), files = files.len(), "download files listed");
        Ok(files)
    }

    /// Requests server-side staging of one file.
    pub async fn prepare(
        &mut self,
        file_name: &str,
        endpoint_type: EndpointType,
    ) -> Result<(), SessionError> {
        self.require_direction(SessionDirection::Download, "prepare a file")?;
        self.advance(SessionState::AwaitingPreparation, "prepare a file")?;
        self.service
            .prepare(self.session.session_id(), file_name, endpoint_type)
            .await
            .map_err(|e| SessionError::service("prepare", e))?;
        debug!(session = %self.session.session_id(), file = %file_name, ?endpoint_type, "preparation requested");
        Ok(())
    }

    /// Polls one file's status until it is PREPARED.
    ///
    /// ERROR resolves to [`SessionError::Preparation`]. The deadline and
    /// `cancel` end the wait with `Timeout` or `Cancelled`.
    pub async fn wait_prepared(
        &self,
        file_name: &str,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<DownloadFileInfo, SessionError> {
        if self.session.state() != SessionState::AwaitingPreparation {
            return Err(self.invalid_state("wait for preparation"));
        }

        let session_id = self.session.session_id();
        let last = Mutex::new(PrepareStatus::Unprepared);
        let info = poll_until(policy, cancel, || {
            let fut = self.service.get_download_file(session_id, file_name);
            let last = &last;
            async move {
                let info = fut.await?;
                let mut previous = last.lock().unwrap_or_else(PoisonError::into_inner);
                if !previous.can_advance_to(info.status) {
                    warn!(
                        session = %session_id,
                        file = %file_name,
                        from = ?*previous,
                        to = ?info.status,
                        "preparation status went backwards"
                    );
                }
                *previous = info.status;
                Ok::<_, ServiceError>(info.status.is_resolved().then_some(info))
            }
        })
        .await
        .map_err(|e| match e {
            PollError::Timeout { waited } => SessionError::Timeout {
                file: file_name.to_string(),
                waited,
            },
            PollError::Cancelled => SessionError::Cancelled,
            PollError::Failed(e) => SessionError::service("get_download_file", e),
        })?;

        match info.status {
            PrepareStatus::Prepared => {
                debug!(session = %session_id, file = %file_name, "file prepared");
                Ok(info)
            }
            _ => Err(SessionError::Preparation {
                file: file_name.to_string(),
                message: info
                    .error_message
                    .unwrap_or_else(|| "server reported ERROR".to_string()),
            }),
        }
    }

    /// Streams a prepared file into `sink`.
    pub async fn download_file(
        &self,
        transport: &dyn Transport,
        file: &DownloadFileInfo,
        sink: DownloadSink<'_>,
    ) -> Result<u64, SessionError> {
        if self.session.state() != SessionState::AwaitingPreparation {
            return Err(self.invalid_state("download bytes"));
        }
        let url = download_url(file).map_err(|e| SessionError::transport(&file.name, e))?;
        let received = transport
            .get(&url, sink)
            .await
            .map_err(|e| SessionError::transport(&file.name, e))?;
        debug!(session = %self.session.session_id(), file = %file.name, bytes = received, "file downloaded");
        Ok(received)
    }

    /// Marks a download session COMPLETED. Downloads have no remote commit.
    pub fn mark_downloaded(&mut self) -> Result<(), SessionError> {
        self.require_direction(SessionDirection::Download, "complete")?;
        if self.session.state() == SessionState::FilesRegistered {
            // Nothing to fetch; skip straight through the preparation state.
            self.advance(SessionState::AwaitingPreparation, "complete")?;
        }
        self.advance(SessionState::Completed, "complete")?;
        info!(session = %self.session.session_id(), item = %self.session.item_id(), "download completed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Cancels the session. Best-effort and idempotent.
    ///
    /// A session that already reached an outcome is left alone. A
    /// `NotFound` answer counts as cancelled.
    pub async fn cancel(&mut self) -> Result<(), CleanupError> {
        if self.session.state().is_terminal() {
            return Ok(());
        }

        self.session.mark_cancel_attempted();
        match self.service.cancel(self.session.handle()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(session = %self.session.session_id(), "cancel: session already gone");
            }
            Err(source) => {
                return Err(CleanupError {
                    step: CleanupStep::Cancel,
                    session: self.session.session_id().to_string(),
                    source,
                });
            }
        }

        let _ = self.session.transition(SessionState::Canceled);
        debug!(session = %self.session.session_id(), "session canceled");
        Ok(())
    }

    /// Deletes the session. Issued at most once; later calls are no-ops.
    ///
    /// Requires COMPLETED, CANCELED, or a prior cancel attempt.
    pub async fn delete(&mut self) -> Result<(), CleanupError> {
        if self.session.state() == SessionState::Deleted {
            return Ok(());
        }
        if !self.session.can_delete() {
            return Err(CleanupError {
                step: CleanupStep::Delete,
                session: self.session.session_id().to_string(),
                source: ServiceError::new(
                    ServiceErrorKind::InvalidState,
                    format!("session is {}; cancel or complete it first", self.session.state()),
                ),
            });
        }

        let result = self.service.delete(self.session.handle()).await;
        // Deleted either way: the call is never repeated.
        self.session.mark_deleted();
        match result {
            Ok(()) => {
                debug!(session = %self.session.session_id(), "session deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(session = %self.session.session_id(), "delete: session already gone");
                Ok(())
            }
            Err(source) => Err(CleanupError {
                step: CleanupStep::Delete,
                session: self.session.session_id().to_string(),
                source,
            }),
        }
    }

    /// Ends the workflow that owns this session.
    ///
    /// On success the session is deleted and a delete failure is handed
    /// back next to the value. On failure the session is canceled then
    /// deleted, and the original error is returned with any cleanup
    /// failures attached.
    pub async fn finish<T>(
        mut self,
        result: Result<T, SessionError>,
    ) -> Result<(T, Option<CleanupError>), WorkflowError> {
        let session_id = self.session.session_id().to_string();
        match result {
            Ok(value) => match self.delete().await {
                Ok(()) => Ok((value, None)),
                Err(e) => {
                    warn!(session = %session_id, error = %e, "delete after success failed");
                    Ok((value, Some(e)))
                }
            },
            Err(primary) => {
                error!(session = %session_id, error = %primary, "transfer failed, cleaning up");
                let mut cleanup = Vec::new();
                if let Err(e) = self.cancel().await {
                    warn!(session = %session_id, error = %e, "cancel failed");
                    cleanup.push(e);
                }
                if let Err(e) = self.delete().await {
                    warn!(session = %session_id, error = %e, "delete failed");
                    cleanup.push(e);
                }
                Err(WorkflowError {
                    primary,
                    cleanup,
                    session_id: Some(session_id),
                })
            }
        }
    }

    fn advance(&mut self, next: SessionState, operation: &'static str) -> Result<(), SessionError> {
        let from = self.session.state();
        self.session
            .transition(next)
            .map_err(|_| self.invalid_state(operation))?;
        if from != next {
            debug!(session = %self.session.session_id(), %from, to = %next, "state changed");
        }
        Ok(())
    }

    fn require_direction(
        &self,
        direction: SessionDirection,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        if self.session.direction() == direction {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            session: self.session.session_id().to_string(),
            state: self.session.state(),
            operation,
        }
    }
}
