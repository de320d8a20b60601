//! Transfer configuration.
//!
//! Stored as TOML:
//! - Linux/macOS: `~/.config/itemxfer/transfer.toml`
//! - Windows: `%APPDATA%/itemxfer/transfer.toml`
//!
//! Every field has a default, so a partial file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors produced while loading or saving settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// How the HTTP transport decides to trust an endpoint's certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustMode {
    /// Publicly trusted roots only.
    #[default]
    System,
    /// Public roots plus the PEM files in `pinned_certificates`.
    Pinned,
    /// Accept any certificate. Must be chosen explicitly.
    AcceptInvalid,
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub trust: TrustMode,
    pub pinned_certificates: Vec<PathBuf>,
    pub connect_timeout_ms: u64,
    /// Size of each streamed body chunk.
    pub buffer_size: usize,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            trust: TrustMode::System,
            pinned_certificates: Vec::new(),
            connect_timeout_ms: 30_000,
            buffer_size: 256 * 1024,
            user_agent: concat!("itemxfer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Download-preparation polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    /// Overall deadline per file. `None` polls until cancelled.
    pub max_wait_ms: Option<u64>,
    /// 1.0 keeps a fixed delay.
    pub backoff_factor: f64,
    pub max_interval_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            max_wait_ms: Some(10 * 60 * 1_000),
            backoff_factor: 1.0,
            max_interval_ms: 15_000,
        }
    }
}

/// Upload workflow settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Attach a SHA-256 checksum to PUSH registrations of local files.
    pub compute_checksums: bool,
    /// Push files reported missing by validation from the directory of
    /// the first local source.
    pub resolve_missing_from_source_dir: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            compute_checksums: false,
            resolve_missing_from_source_dir: true,
        }
    }
}

/// Endpoint kind requested when preparing download files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadEndpointKind {
    #[default]
    Https,
    Direct,
}

/// Download workflow settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Keep fetching sibling files after one fails.
    pub continue_on_file_error: bool,
    pub endpoint_type: DownloadEndpointKind,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            continue_on_file_error: true,
            endpoint_type: DownloadEndpointKind::Https,
        }
    }
}

/// Complete transfer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub http: HttpSettings,
    pub poll: PollSettings,
    pub upload: UploadSettings,
    pub download: DownloadSettings,
}

impl TransferSettings {
    /// Loads and validates settings from `path`.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings: TransferSettings = toml::from_str(&content)?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Loads settings from `path`, or returns defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Writes settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Rejects values the transfer code cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.http.buffer_size == 0 {
            return Err(SettingsError::Invalid("http.buffer_size must be > 0".into()));
        }
        if self.http.trust == TrustMode::Pinned && self.http.pinned_certificates.is_empty() {
            return Err(SettingsError::Invalid(
                "http.trust = \"pinned\" requires http.pinned_certificates".into(),
            ));
        }
        if self.poll.interval_ms == 0 {
            return Err(SettingsError::Invalid("poll.interval_ms must be > 0".into()));
        }
        if self.poll.backoff_factor < 1.0 {
            return Err(SettingsError::Invalid(
                "poll.backoff_factor must be >= 1.0".into(),
            ));
        }
        if self.poll.max_interval_ms < self.poll.interval_ms {
            return Err(SettingsError::Invalid(
                "poll.max_interval_ms must be >= poll.interval_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Returns the platform-specific settings file path.
pub fn default_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("itemxfer").join("transfer.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("itemxfer")
            .join("transfer.toml")
    }
}
