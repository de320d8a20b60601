//! Recording fakes shared by the integration tests.
//!
//! `FakeService` and `FakeTransport` write to one ordered call log so a
//! test can assert the exact interleaving of service calls and byte
//! transfers.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use itemxfer_protocol::{
    AddFileSpec, ClientToken, DownloadFileInfo, EndpointType, FileInfo, PrepareStatus,
    SessionDirection, SessionHandle, SourceType, TransferEndpoint, ValidationResult,
};
use itemxfer_session::{ServiceError, ServiceErrorKind, ServiceFuture, SessionService};
use itemxfer_transfer::{DownloadSink, TransferError, Transport, TransportFuture, UploadSource, Url};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Debug, Default)]
struct SessionRecord {
    files: Vec<AddFileSpec>,
    canceled: bool,
    completed: bool,
    deleted: bool,
}

/// In-memory transfer-session service.
pub struct FakeService {
    log: CallLog,
    next_id: AtomicU32,
    tokens: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    /// Files validation expects; anything not registered is missing.
    expected: Mutex<BTreeSet<String>>,
    /// Scripted validation results, used before `expected`.
    validations: Mutex<VecDeque<ValidationResult>>,
    download_files: Mutex<Vec<DownloadFileInfo>>,
    statuses: Mutex<HashMap<String, VecDeque<PrepareStatus>>>,
    status_times: Mutex<Vec<(String, Instant)>>,
    failures: Mutex<HashMap<&'static str, ServiceError>>,
    fail_once: Mutex<HashSet<&'static str>>,
}

impl FakeService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            next_id: AtomicU32::new(1),
            tokens: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            expected: Mutex::new(BTreeSet::new()),
            validations: Mutex::new(VecDeque::new()),
            download_files: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            status_times: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            fail_once: Mutex::new(HashSet::new()),
        }
    }

    pub fn expect_files<I: IntoIterator<Item = &'static str>>(&self, names: I) {
        self.expected
            .lock()
            .unwrap()
            .extend(names.into_iter().map(String::from));
    }

    pub fn script_validation(&self, result: ValidationResult) {
        self.validations.lock().unwrap().push_back(result);
    }

    /// Adds a download file whose status lookups return `statuses` in
    /// order; the last one repeats.
    pub fn add_download_file(&self, name: &str, size: Option<u64>, statuses: &[PrepareStatus]) {
        let mut info = DownloadFileInfo::new(name, PrepareStatus::Unprepared);
        info.size = size;
        self.download_files.lock().unwrap().push(info);
        self.statuses
            .lock()
            .unwrap()
            .insert(name.to_string(), statuses.iter().copied().collect());
    }

    /// Every call to `op` fails with `error`.
    pub fn fail(&self, op: &'static str, error: ServiceError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    /// The next call to `op` fails with `error`.
    pub fn fail_once(&self, op: &'static str, error: ServiceError) {
        self.fail(op, error);
        self.fail_once.lock().unwrap().insert(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn status_times(&self, name: &str) -> Vec<Instant> {
        self.status_times
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn session_deleted(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .is_some_and(|s| s.deleted)
    }

    pub fn session_canceled(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .is_some_and(|s| s.canceled)
    }

    pub fn registered(&self, session_id: &str) -> Vec<AddFileSpec> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.files.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }

    fn injected(&self, op: &'static str) -> Result<(), ServiceError> {
        let mut failures = self.failures.lock().unwrap();
        let Some(err) = failures.get(op).cloned() else {
            return Ok(());
        };
        if self.fail_once.lock().unwrap().remove(op) {
            failures.remove(op);
        }
        Err(err)
    }

    fn with_live_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionRecord) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(session_id) {
            Some(record) if !record.deleted => f(record),
            _ => Err(ServiceError::not_found(format!("session {session_id}"))),
        }
    }

    fn do_create(&self, direction: SessionDirection, token: Option<&ClientToken>) -> Result<String, ServiceError> {
        if let Some(token) = token
            && let Some(existing) = self.tokens.lock().unwrap().get(token.as_str())
        {
            return Ok(existing.clone());
        }
        let id = format!(
            "{direction}-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), SessionRecord::default());
        if let Some(token) = token {
            self.tokens
                .lock()
                .unwrap()
                .insert(token.as_str().to_string(), id.clone());
        }
        // A transient failure after the server already created the session.
        self.injected("create")?;
        Ok(id)
    }

    fn do_validate(&self, session_id: &str) -> Result<ValidationResult, ServiceError> {
        if let Some(scripted) = self.validations.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        let registered: BTreeSet<String> = self.with_live_session(session_id, |s| {
            Ok(s.files.iter().map(|f| f.name.clone()).collect())
        })?;
        let missing: Vec<String> = self
            .expected
            .lock()
            .unwrap()
            .difference(&registered)
            .cloned()
            .collect();
        Ok(ValidationResult::with_errors(missing, Vec::<String>::new()))
    }

    fn do_status(&self, file_name: &str) -> Result<DownloadFileInfo, ServiceError> {
        self.status_times
            .lock()
            .unwrap()
            .push((file_name.to_string(), Instant::now()));
        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses
            .get_mut(file_name)
            .ok_or_else(|| ServiceError::not_found(format!("file {file_name}")))?;
        let status = if queue.len() > 1 {
            queue.pop_front().unwrap_or(PrepareStatus::Error)
        } else {
            queue.front().copied().unwrap_or(PrepareStatus::Error)
        };

        let size = self
            .download_files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.name == file_name)
            .and_then(|f| f.size);
        let mut info = DownloadFileInfo::new(file_name, status);
        info.size = size;
        match status {
            PrepareStatus::Prepared => {
                info.download_endpoint =
                    Some(TransferEndpoint::new(format!("https://fake.local/dl/{file_name}")));
            }
            PrepareStatus::Error => info.error_message = Some("staging failed".into()),
            _ => {}
        }
        Ok(info)
    }
}

impl SessionService for FakeService {
    fn create<'a>(
        &'a self,
        direction: SessionDirection,
        item_id: &'a str,
        client_token: Option<&'a ClientToken>,
    ) -> ServiceFuture<'a, String> {
        self.record(format!("create {direction} {item_id}"));
        Box::pin(async move { self.do_create(direction, client_token) })
    }

    fn add_file<'a>(
        &'a self,
        session_id: &'a str,
        spec: &'a AddFileSpec,
    ) -> ServiceFuture<'a, FileInfo> {
        self.record(format!("add_file {}", spec.name));
        Box::pin(async move {
            self.injected("add_file")?;
            self.with_live_session(session_id, |s| {
                if s.completed || s.canceled {
                    return Err(ServiceError::new(ServiceErrorKind::InvalidState, "session closed"));
                }
                s.files.push(spec.clone());
                Ok(())
            })?;
            let upload_endpoint = (spec.source_type == SourceType::Push).then(|| {
                TransferEndpoint::new(format!("https://fake.local/{session_id}/{}", spec.name))
            });
            Ok(FileInfo {
                name: spec.name.clone(),
                source_type: spec.source_type,
                size: spec.size,
                checksum: spec.checksum.clone(),
                upload_endpoint,
            })
        })
    }

    fn validate<'a>(&'a self, session_id: &'a str) -> ServiceFuture<'a, ValidationResult> {
        self.record("validate".into());
        Box::pin(async move {
            self.injected("validate")?;
            self.do_validate(session_id)
        })
    }

    fn complete<'a>(&'a self, session_id: &'a str) -> ServiceFuture<'a, ()> {
        self.record("complete".into());
        Box::pin(async move {
            self.injected("complete")?;
            self.with_live_session(session_id, |s| {
                s.completed = true;
                Ok(())
            })
        })
    }

    fn cancel<'a>(&'a self, session: &'a SessionHandle) -> ServiceFuture<'a, ()> {
        self.record("cancel".into());
        Box::pin(async move {
            self.injected("cancel")?;
            self.with_live_session(&session.session_id, |s| {
                if !s.completed {
                    s.canceled = true;
                }
                Ok(())
            })
        })
    }

    fn delete<'a>(&'a self, session: &'a SessionHandle) -> ServiceFuture<'a, ()> {
        self.record("delete".into());
        Box::pin(async move {
            self.injected("delete")?;
            self.with_live_session(&session.session_id, |s| {
                s.deleted = true;
                Ok(())
            })
        })
    }

    fn list_download_files<'a>(
        &'a self,
        session_id: &'a str,
    ) -> ServiceFuture<'a, Vec<DownloadFileInfo>> {
        self.record("list".into());
        Box::pin(async move {
            self.injected("list")?;
            self.with_live_session(session_id, |_| Ok(()))?;
            Ok(self.download_files.lock().unwrap().clone())
        })
    }

    fn prepare<'a>(
        &'a self,
        _session_id: &'a str,
        file_name: &'a str,
        _endpoint_type: EndpointType,
    ) -> ServiceFuture<'a, ()> {
        self.record(format!("prepare {file_name}"));
        Box::pin(async move { self.injected("prepare") })
    }

    fn get_download_file<'a>(
        &'a self,
        _session_id: &'a str,
        file_name: &'a str,
    ) -> ServiceFuture<'a, DownloadFileInfo> {
        self.record(format!("status {file_name}"));
        Box::pin(async move {
            self.injected("status")?;
            self.do_status(file_name)
        })
    }
}

/// Recording transport.
///
/// PUT bodies are kept per URL path; GET serves bodies registered with
/// [`FakeTransport::serve`].
pub struct FakeTransport {
    log: CallLog,
    received: Mutex<HashMap<String, Vec<u8>>>,
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    fail_put_after: Mutex<Option<(String, usize)>>,
}

impl FakeTransport {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            received: Mutex::new(HashMap::new()),
            bodies: Mutex::new(HashMap::new()),
            fail_put_after: Mutex::new(None),
        }
    }

    /// Body for GET requests whose path ends with `/name`.
    pub fn serve(&self, name: &str, body: Vec<u8>) {
        self.bodies
            .lock()
            .unwrap()
            .insert(format!("/dl/{name}"), body);
    }

    /// PUTs whose path ends with `name` fail after `bytes` bytes.
    pub fn fail_put_after(&self, name: &str, bytes: usize) {
        *self.fail_put_after.lock().unwrap() = Some((name.to_string(), bytes));
    }

    /// Bytes received by the PUT whose path ends with `name`.
    pub fn received(&self, name: &str) -> Option<Vec<u8>> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| path.ends_with(&format!("/{name}")))
            .map(|(_, body)| body.clone())
    }
}

impl Transport for FakeTransport {
    fn put<'a>(
        &'a self,
        url: &'a Url,
        source: UploadSource<'a>,
        length: Option<u64>,
    ) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            let path = url.path().to_string();
            let fail_after = self
                .fail_put_after
                .lock()
                .unwrap()
                .as_ref()
                .filter(|(name, _)| path.ends_with(name.as_str()))
                .map(|(_, n)| *n);

            let mut body = Vec::new();
            let mut buf = [0u8; 64];
            loop {
                let want = match fail_after {
                    Some(limit) if body.len() >= limit => {
                        self.log
                            .lock()
                            .unwrap()
                            .push(format!("PUT {path} failed after {}", body.len()));
                        return Err(TransferError::Io(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "connection reset by peer",
                        )));
                    }
                    Some(limit) => buf.len().min(limit - body.len()),
                    None => buf.len(),
                };
                let n = source.read(&mut buf[..want]).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
            }

            let sent = body.len() as u64;
            if let Some(expected) = length
                && expected != sent
            {
                return Err(TransferError::LengthMismatch {
                    expected,
                    actual: sent,
                });
            }
            self.log.lock().unwrap().push(format!("PUT {path} {sent}"));
            self.received.lock().unwrap().insert(path, body);
            Ok(sent)
        })
    }

    fn get<'a>(&'a self, url: &'a Url, sink: DownloadSink<'a>) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            let path = url.path().to_string();
            let body = self.bodies.lock().unwrap().get(&path).cloned();
            let Some(body) = body else {
                self.log.lock().unwrap().push(format!("GET {path} 404"));
                return Err(TransferError::Status {
                    status: 404,
                    url: url.to_string(),
                });
            };
            sink.write_all(&body).await?;
            sink.flush().await?;
            self.log
                .lock()
                .unwrap()
                .push(format!("GET {path} {}", body.len()));
            Ok(body.len() as u64)
        })
    }
}

/// Builds an in-memory tar archive.
pub fn build_tar(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, data.as_slice())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
