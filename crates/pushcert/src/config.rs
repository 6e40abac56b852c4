//! Certificate configuration and settings loading.
//!
//! Settings are read from `~/.pushcert/config.json` (camelCase JSON) and then
//! overridden by `PUSHCERT_*` environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `PUSHCERT_CERT_NAME` | `certificate.name` |
//! | `PUSHCERT_PASSWORD` | `certificate.password` |
//! | `PUSHCERT_HOST` | `certificate.host` |
//! | `PUSHCERT_ARCHIVE_DIR` | `archiveDir` |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default request timeout applied by the HTTP transport.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// APNs environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    /// Development endpoint, for apps signed with a development profile.
    #[default]
    Sandbox,
    /// Production endpoint.
    Production,
}

impl Host {
    /// Base URL of the provider API for this environment.
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://api.development.push.apple.com",
            Self::Production => "https://api.push.apple.com",
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sandbox => f.write_str("sandbox"),
            Self::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Host {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "development" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidHost {
                value: s.to_string(),
            }),
        }
    }
}

/// Certificate archive identity and target environment.
///
/// Immutable once built; the client shares it read-only for its lifetime.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateConfig {
    /// Archive name, without the `.p12` extension.
    pub name: String,
    /// Archive passphrase.
    #[serde(default)]
    pub password: String,
    /// APNs environment.
    #[serde(default)]
    pub host: Host,
}

impl CertificateConfig {
    /// Create a certificate configuration.
    pub fn new(name: impl Into<String>, password: impl Into<String>, host: Host) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            host,
        }
    }
}

impl fmt::Debug for CertificateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateConfig")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

/// Everything needed to build a client from a settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSettings {
    /// Certificate archive configuration.
    pub certificate: CertificateConfig,
    /// Directory holding `<name>.p12`. Defaults to the working directory.
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl PushSettings {
    /// Settings for `certificate` with defaults for everything else.
    pub fn new(certificate: CertificateConfig) -> Self {
        Self {
            certificate,
            archive_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Apply `PUSHCERT_*` overrides read through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(name) = lookup("PUSHCERT_CERT_NAME") {
            self.certificate.name = name;
        }
        if let Some(password) = lookup("PUSHCERT_PASSWORD") {
            self.certificate.password = password;
        }
        if let Some(host) = lookup("PUSHCERT_HOST") {
            self.certificate.host = host.parse()?;
        }
        if let Some(dir) = lookup("PUSHCERT_ARCHIVE_DIR") {
            self.archive_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.certificate.name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        Ok(())
    }
}

/// Settings loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file could not be read.
    #[error("failed to read settings at {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// I/O error.
        source: std::io::Error,
    },
    /// Settings file is not valid JSON for [`PushSettings`].
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// JSON error.
        source: serde_json::Error,
    },
    /// Host value is neither `sandbox` nor `production`.
    #[error("invalid host {value:?}, expected \"sandbox\" or \"production\"")]
    InvalidHost {
        /// Rejected value.
        value: String,
    },
    /// No certificate archive name configured.
    #[error("certificate name is required")]
    MissingName,
}

/// Default settings path (`~/.pushcert/config.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pushcert").join("config.json")
}

/// Load settings from the default path with environment overrides.
pub fn load_settings() -> Result<PushSettings, ConfigError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with environment overrides.
pub fn load_settings_from_path(path: &Path) -> Result<PushSettings, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

pub(crate) fn load_with_env(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PushSettings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings: PushSettings =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.apply_env_overrides(lookup)?;
    settings.validate()?;

    debug!(
        ?path,
        name = %settings.certificate.name,
        host = %settings.certificate.host,
        "push settings loaded"
    );
    Ok(settings)
}
