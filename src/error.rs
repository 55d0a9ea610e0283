//! Error handling and custom error types
//!
//! Provides unified error handling across the uploader using thiserror.
//! Every failure of an upload is local to that request and is reported
//! through the `Err` side of the upload result.

use crate::models::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported argument type passed to upload: {0}")]
    UnsupportedInput(String),

    #[error("Filename not included in file data")]
    MissingFilename,

    #[error("No response from API on upload attempt")]
    NoResponse,

    #[error("Receiving frame failed to load: {0}")]
    LoadFailure(String),

    #[error("Upload transport failed: {0}")]
    TransportFailure(ApiError),

    #[error("API error: {0}")]
    ServerError(ApiError),

    #[error("API returned warnings: {0}")]
    ServerWarning(serde_json::Value),

    #[error("Token error: {0}")]
    Token(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The API error code carried by server and transport failures.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Error::ServerError(api) | Error::TransportFailure(api) => Some(&api.code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
