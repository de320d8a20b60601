//! Upload workflow: register files, push bytes, validate, commit.
//!
//! # Pipeline
//!
//! 1. **Create** an upload session for the item
//! 2. **Register** each source; PUSH files are streamed right after their
//!    registration, PULL files are left to the server
//! 3. **Validate**; files reported missing are looked up next to the first
//!    local source and pushed, then the session is validated again
//! 4. **Complete** only on a clean validation
//! 5. **Delete** the session, after a cancel if anything failed

use std::path::{Path, PathBuf};

use itemxfer_protocol::{AddFileSpec, ClientToken, SessionDirection, ValidationResult};
use itemxfer_settings::UploadSettings;
use itemxfer_transfer::{Transport, file_checksum, resolve_local_path};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::SessionClient;
use crate::error::{SessionError, WorkflowError};
use crate::service::SessionService;
use crate::types::{EventSink, TransferEvent, UploadOutcome, UploadedFile};

/// Where one uploaded file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// PUSH: streamed from a local file.
    LocalFile { name: String, path: PathBuf },
    /// PULL: the server fetches `uri` itself.
    Pull { name: String, uri: String },
}

impl UploadSource {
    /// PUSH source named after the file's last path component.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::LocalFile { name, path }
    }

    pub fn pull(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::Pull {
            name: name.into(),
            uri: uri.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::LocalFile { name, .. } | Self::Pull { name, .. } => name,
        }
    }
}

/// Files to upload into one library item.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub item_id: String,
    pub sources: Vec<UploadSource>,
    /// Reuse the same token when retrying after a transient failure.
    pub client_token: Option<ClientToken>,
}

impl UploadRequest {
    /// Request with a freshly generated client token.
    pub fn new(item_id: impl Into<String>, sources: Vec<UploadSource>) -> Self {
        Self {
            item_id: item_id.into(),
            sources,
            client_token: Some(ClientToken::generate()),
        }
    }

    /// Directory of the first local source, used to resolve missing files.
    fn source_dir(&self) -> Option<&Path> {
        self.sources.iter().find_map(|s| match s {
            UploadSource::LocalFile { path, .. } => path.parent(),
            UploadSource::Pull { .. } => None,
        })
    }
}

/// Runs upload sessions against one service and transport.
pub struct UploadWorkflow<'a> {
    service: &'a dyn SessionService,
    transport: &'a dyn Transport,
    settings: UploadSettings,
    cancel: CancellationToken,
    events: EventSink,
}

impl<'a> UploadWorkflow<'a> {
    pub fn new(service: &'a dyn SessionService, transport: &'a dyn Transport) -> Self {
        Self {
            service,
            transport,
            settings: UploadSettings::default(),
            cancel: CancellationToken::new(),
            events: EventSink::default(),
        }
    }

    pub fn with_settings(mut self, settings: UploadSettings) -> Self {
        self.settings = settings;
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

    /// Uploads every source into `request.item_id` and commits the session.
    ///
    /// The session is always deleted before this returns. On failure it is
    /// canceled first, and the error reports any cleanup failure next to
    /// the original one.
    pub async fn run(&self, request: &UploadRequest) -> Result<UploadOutcome, WorkflowError> {
        if request.sources.is_empty() {
            return Err(SessionError::Empty.into());
        }
        check_cancelled(&self.cancel)?;

        let mut client = SessionClient::create(
            self.service,
            SessionDirection::Upload,
            &request.item_id,
            request.client_token.clone(),
        )
        .await?;
        let session_id = client.session_id().to_string();
        self.events.emit(TransferEvent::SessionCreated {
            item_id: request.item_id.clone(),
            session_id: session_id.clone(),
            direction: SessionDirection::Upload,
        });

        let result = self.drive(&mut client, request).await;
        let ((files, validation), cleanup_error) = client.finish(result).await?;

        let outcome = UploadOutcome {
            item_id: request.item_id.clone(),
            session_id,
            files,
            validation,
            cleanup_error,
        };
        info!(
            session = %outcome.session_id,
            item = %outcome.item_id,
            files = outcome.files.len(),
            bytes = outcome.bytes(),
            "upload finished"
        );
        Ok(outcome)
    }

    async fn drive(
        &self,
        client: &mut SessionClient<'_>,
        request: &UploadRequest,
    ) -> Result<(Vec<UploadedFile>, ValidationResult), SessionError> {
        let mut files = Vec::with_capacity(request.sources.len());

        for source in &request.sources {
            check_cancelled(&self.cancel)?;
            let uploaded = match source {
                UploadSource::LocalFile { name, path } => self.push_local(client, name, path).await?,
                UploadSource::Pull { name, uri } => {
                    client.add_file(&AddFileSpec::pull(name, uri)).await?;
                    UploadedFile {
                        name: name.clone(),
                        bytes: None,
                    }
                }
            };
            files.push(uploaded);
        }

        check_cancelled(&self.cancel)?;
        let mut validation = self.validate(client).await?;

        if !validation.is_clean()
            && self.settings.resolve_missing_from_source_dir
            && let Some(dir) = request.source_dir()
        {
            let pushed = self
                .push_missing(client, dir, &validation, &mut files)
                .await?;
            if pushed > 0 {
                validation = self.validate(client).await?;
            }
        }

        if !validation.is_clean() {
            return Err(SessionError::Validation(validation));
        }

        check_cancelled(&self.cancel)?;
        client.complete().await?;
        Ok((files, validation))
    }

    /// Pushes missing files found in `dir`. Returns how many were pushed.
    async fn push_missing(
        &self,
        client: &mut SessionClient<'_>,
        dir: &Path,
        validation: &ValidationResult,
        files: &mut Vec<UploadedFile>,
    ) -> Result<usize, SessionError> {
        let mut pushed = 0;
        for name in &validation.missing_files {
            check_cancelled(&self.cancel)?;
            let path = resolve_local_path(dir, name)
                .map_err(|e| SessionError::transport(name, e))?;
            if !tokio::fs::try_exists(&path).await? {
                warn!(file = %name, dir = %dir.display(), "missing file not found locally");
                continue;
            }
            debug!(file = %name, "pushing file reported missing");
            files.push(self.push_local(client, name, &path).await?);
            pushed += 1;
        }
        Ok(pushed)
    }

    async fn push_local(
        &self,
        client: &mut SessionClient<'_>,
        name: &str,
        path: &Path,
    ) -> Result<UploadedFile, SessionError> {
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let mut spec = AddFileSpec::push(name).with_size(size);
        if self.settings.compute_checksums {
            let checksum = file_checksum(path)
                .await
                .map_err(|e| SessionError::transport(name, e))?;
            spec = spec.with_checksum(checksum);
        }

        let info = client.add_file(&spec).await?;
        self.events.emit(TransferEvent::FileStarted {
            session_id: client.session_id().to_string(),
            file: name.to_string(),
        });

        let sent = client
            .upload_file(self.transport, &info, &mut file, Some(size))
            .await?;
        self.events.emit(TransferEvent::FileFinished {
            session_id: client.session_id().to_string(),
            file: name.to_string(),
            bytes: sent,
        });

        Ok(UploadedFile {
            name: name.to_string(),
            bytes: Some(sent),
        })
    }

    async fn validate(
        &self,
        client: &mut SessionClient<'_>,
    ) -> Result<ValidationResult, SessionError> {
        let result = client.validate().await?;
        self.events.emit(TransferEvent::Validated {
            session_id: client.session_id().to_string(),
            result: result.clone(),
        });
        Ok(result)
    }
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), SessionError> {
    if cancel.is_cancelled() {
        Err(SessionError::Cancelled)
    } else {
        Ok(())
    }
}
