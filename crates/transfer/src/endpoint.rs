use itemxfer_protocol::{DownloadFileInfo, FileInfo, PrepareStatus, SourceType, TransferEndpoint};
use reqwest::Url;

use crate::TransferError;

/// Parses an endpoint URI. Only `http` and `https` are accepted.
pub fn parse_endpoint(endpoint: &TransferEndpoint) -> Result<Url, TransferError> {
    let url = Url::parse(&endpoint.uri)
        .map_err(|e| TransferError::InvalidEndpoint(format!("{}: {e}", endpoint.uri)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TransferError::InvalidEndpoint(format!(
            "unsupported scheme {other:?} in {}",
            endpoint.uri
        ))),
    }
}

/// PUT target for a registered PUSH file.
pub fn upload_url(file: &FileInfo) -> Result<Url, TransferError> {
    if file.source_type != SourceType::Push {
        return Err(TransferError::InvalidEndpoint(format!(
            "{} is not a PUSH file",
            file.name
        )));
    }
    let endpoint = file.upload_endpoint.as_ref().ok_or_else(|| {
        TransferError::InvalidEndpoint(format!("{} has no upload endpoint", file.name))
    })?;
    parse_endpoint(endpoint)
}

/// GET source for a prepared download file.
pub fn download_url(file: &DownloadFileInfo) -> Result<Url, TransferError> {
    if file.status != PrepareStatus::Prepared {
        return Err(TransferError::InvalidEndpoint(format!(
            "{} is {:?}, not PREPARED",
            file.name, file.status
        )));
    }
    let endpoint = file.download_endpoint.as_ref().ok_or_else(|| {
        TransferError::InvalidEndpoint(format!("{} has no download endpoint", file.name))
    })?;
    parse_endpoint(endpoint)
}
