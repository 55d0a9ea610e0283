//! Data models and structures
//!
//! Defines upload requests, the file handles they carry, the decoded API
//! error shape, and runtime configuration.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Caller-supplied fields that are forwarded to the server. Anything else
/// in [`UploadRequest::fields`] is silently dropped.
pub const ALLOWED_FIELDS: [&str; 5] = ["filename", "comment", "text", "watchlist", "ignorewarnings"];

/// API error code that marks the attached token as rejected.
pub const BAD_TOKEN_CODE: &str = "badtoken";

/// Error code used for failures that never produced a decodable reply.
pub const HTTP_ERROR_CODE: &str = "http";

/// In-memory file contents with a name.
#[derive(Debug, Clone)]
pub struct Blob {
    pub name: String,
    pub data: Bytes,
    pub mime_type: Option<String>,
}

impl Blob {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The file being uploaded.
///
/// A `Reference` points at a file on local disk and can only travel through
/// the form-submission transport; a `Blob` is eligible for streaming.
#[derive(Debug, Clone)]
pub enum FileHandle {
    Reference(PathBuf),
    Blob(Blob),
}

impl FileHandle {
    pub fn is_blob(&self) -> bool {
        matches!(self, FileHandle::Blob(_))
    }

    /// Name the file is submitted under.
    pub fn file_name(&self) -> String {
        match self {
            FileHandle::Blob(blob) => blob.name.clone(),
            FileHandle::Reference(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("file")
                .to_string(),
        }
    }
}

impl From<Blob> for FileHandle {
    fn from(blob: Blob) -> Self {
        FileHandle::Blob(blob)
    }
}

impl From<PathBuf> for FileHandle {
    fn from(path: PathBuf) -> Self {
        FileHandle::Reference(path)
    }
}

/// A single upload: the file plus the caller's field mapping.
///
/// Fields keep insertion order; setting a name twice replaces the value.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub file: Option<FileHandle>,
    pub fields: Vec<(String, String)>,
}

impl UploadRequest {
    pub fn new(file: impl Into<FileHandle>) -> Self {
        Self {
            file: Some(file.into()),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(key, _)| key == name)
    }

    /// Fields that survive the allow-list, in caller order.
    pub fn allowed_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter(|(key, _)| ALLOWED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// The `error` object of an API reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    #[serde(default = "unknown_code")]
    pub code: String,
    #[serde(default)]
    pub info: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn unknown_code() -> String {
    "unknown".to_string()
}

impl ApiError {
    pub fn new(code: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            info: info.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Decode an `error` value; non-object values become the info text.
    pub fn from_value(value: &serde_json::Value) -> Self {
        match serde_json::from_value::<ApiError>(value.clone()) {
            Ok(error) if value.is_object() => error,
            _ => Self::new(unknown_code(), value.to_string()),
        }
    }

    pub fn is_bad_token(&self) -> bool {
        self.code == BAD_TOKEN_CODE
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.info.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.info)
        }
    }
}

/// Which transport the probe is allowed to consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Auto,
    Legacy,
}

impl std::str::FromStr for TransportMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(TransportMode::Auto),
            "legacy" => Ok(TransportMode::Legacy),
            other => Err(crate::Error::Config(format!(
                "Unknown upload transport '{}'. Expected 'auto' or 'legacy'",
                other
            ))),
        }
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub timeout: Duration,
    pub transport: TransportMode,
    pub user_agent: String,
}

impl Config {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            timeout: Duration::from_secs(300),
            transport: TransportMode::Auto,
            user_agent: default_user_agent(),
        }
    }

    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();

        let api_url = std::env::var("MW_API_URL")
            .map_err(|_| crate::Error::Config("MW_API_URL not set".to_string()))?;

        let timeout = match std::env::var("MW_HTTP_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                crate::Error::Config(format!("Invalid MW_HTTP_TIMEOUT_SECS '{}'", raw))
            })?),
            Err(_) => Duration::from_secs(300),
        };

        let transport = match std::env::var("MW_UPLOAD_TRANSPORT") {
            Ok(raw) => raw.parse()?,
            Err(_) => TransportMode::Auto,
        };

        Ok(Self {
            api_url,
            timeout,
            transport,
            user_agent: std::env::var("MW_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
        })
    }
}

fn default_user_agent() -> String {
    format!("mw-upload/{}", env!("CARGO_PKG_VERSION"))
}
