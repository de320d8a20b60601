//! Data model for transfer sessions against content-library items.
//!
//! A transfer session moves one or more named byte streams into
//! (upload) or out of (download) a single library item. This crate only
//! holds the types both sides of the exchange agree on; the remote
//! service schema is owned by the vendor and mapped onto these types by
//! the service adapter.

pub mod endpoint;
pub mod file;
pub mod session;
pub mod validation;

pub use endpoint::{EndpointType, TransferEndpoint};
pub use file::{
    AddFileSpec, Checksum, ChecksumAlgorithm, DownloadFileInfo, FileInfo, PrepareStatus,
    SourceType,
};
pub use session::{
    ClientToken, InvalidTransition, SessionDirection, SessionHandle, SessionState, TransferSession,
};
pub use validation::ValidationResult;
