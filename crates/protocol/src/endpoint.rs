use serde::{Deserialize, Serialize};

/// Kind of endpoint requested when preparing a download file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointType {
    /// HTTPS endpoint served by the management node.
    #[default]
    Https,
    /// Direct endpoint on the storage host.
    Direct,
}

/// A network location bytes are pushed to or pulled from.
///
/// Certificate trust is decided by the transport's trust policy, not per
/// endpoint; server-published thumbprints are ignored when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEndpoint {
    pub uri: String,
}

impl TransferEndpoint {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}
