//! Remote transfer-session service boundary.
//!
//! `SessionService` is implemented by the embedding application on top of
//! its authenticated vendor client. The workflows in this crate only see
//! the trait, which keeps them testable with a recording fake.

use std::future::Future;
use std::pin::Pin;

use itemxfer_protocol::{
    AddFileSpec, ClientToken, DownloadFileInfo, EndpointType, FileInfo, SessionDirection,
    SessionHandle, ValidationResult,
};

use crate::error::ServiceError;

/// Boxed future returned by [`SessionService`] methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Operations of the remote transfer-session service.
///
/// Upload sessions use `add_file`, `validate` and `complete`; download
/// sessions use `list_download_files`, `prepare` and `get_download_file`.
/// `cancel` and `delete` take a [`SessionHandle`] so an adapter can route
/// them by direction. Both should report [`ServiceErrorKind::NotFound`]
/// for a session that no longer exists; the client treats that as done.
///
/// [`ServiceErrorKind::NotFound`]: crate::ServiceErrorKind::NotFound
pub trait SessionService: Send + Sync {
    /// Creates a session bound to `item_id` and returns its id.
    ///
    /// A repeated call with the same `client_token` must return the
    /// session created by the first call.
    fn create<'a>(
        &'a self,
        direction: SessionDirection,
        item_id: &'a str,
        client_token: Option<&'a ClientToken>,
    ) -> ServiceFuture<'a, String>;

    /// Registers a file with an upload session.
    fn add_file<'a>(
        &'a self,
        session_id: &'a str,
        spec: &'a AddFileSpec,
    ) -> ServiceFuture<'a, FileInfo>;

    /// Reports missing or invalid files. Has no side effects.
    fn validate<'a>(&'a self, session_id: &'a str) -> ServiceFuture<'a, ValidationResult>;

    /// Commits an upload session.
    fn complete<'a>(&'a self, session_id: &'a str) -> ServiceFuture<'a, ()>;

    fn cancel<'a>(&'a self, session: &'a SessionHandle) -> ServiceFuture<'a, ()>;

    fn delete<'a>(&'a self, session: &'a SessionHandle) -> ServiceFuture<'a, ()>;

    /// Files the item exposes through a download session.
    fn list_download_files<'a>(
        &'a self,
        session_id: &'a str,
    ) -> ServiceFuture<'a, Vec<DownloadFileInfo>>;

    /// Asks the server to stage `file_name` for download.
    fn prepare<'a>(
        &'a self,
        session_id: &'a str,
        file_name: &'a str,
        endpoint_type: EndpointType,
    ) -> ServiceFuture<'a, ()>;

    /// Current preparation status of one download file.
    fn get_download_file<'a>(
        &'a self,
        session_id: &'a str,
        file_name: &'a str,
    ) -> ServiceFuture<'a, DownloadFileInfo>;
}
