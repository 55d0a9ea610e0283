//! Upload coordination: validation, transport selection, and hand-off.

use crate::models::{Config, FileHandle, UploadRequest};
use crate::probe::Capabilities;
use crate::progress::ProgressSink;
use crate::surface::{HttpSurfaceHost, SurfaceHost};
use crate::token::{ApiTokenProvider, TokenProvider};
use crate::transport::{CorrelationIds, LegacyFormTransport, Strategy, StreamingTransport};
use crate::{Error, Result};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for uploading files to one API endpoint.
pub struct Uploader {
    capabilities: Capabilities,
    streaming: StreamingTransport,
    legacy: LegacyFormTransport,
}

/// Injectable dependencies used to construct [`Uploader`] in tests/harnesses.
pub struct UploaderServices {
    pub client: Client,
    pub api_url: String,
    pub tokens: Arc<dyn TokenProvider>,
    pub surfaces: Arc<dyn SurfaceHost>,
    pub capabilities: Capabilities,
}

impl Uploader {
    pub fn with_services(services: UploaderServices) -> Self {
        let streaming = StreamingTransport::new(
            services.client,
            services.api_url.clone(),
            services.tokens.clone(),
        );
        let legacy = LegacyFormTransport::new(
            services.api_url,
            services.surfaces,
            services.tokens,
            CorrelationIds::new(),
        );

        Self {
            capabilities: services.capabilities,
            streaming,
            legacy,
        }
    }

    /// Build an uploader with real HTTP-backed services.
    ///
    /// Token requests, streamed uploads and form submissions share one
    /// client so they share the session cookies.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()?;

        info!(api = %config.api_url, transport = ?config.transport, "Configured uploader");

        Ok(Self::with_services(UploaderServices {
            client: client.clone(),
            api_url: config.api_url.clone(),
            tokens: Arc::new(ApiTokenProvider::new(client.clone(), config.api_url.clone())),
            surfaces: Arc::new(HttpSurfaceHost::new(client)),
            capabilities: Capabilities::for_mode(config.transport),
        }))
    }

    /// Streaming is used only when the environment supports it and the file
    /// is already a blob.
    pub fn select_strategy(&self, file: &FileHandle) -> Strategy {
        if self.capabilities.supports_streaming_upload() && file.is_blob() {
            Strategy::Streaming
        } else {
            Strategy::LegacyForm
        }
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<Value> {
        self.upload_with_progress(request, &ProgressSink::disabled())
            .await
    }

    /// Upload `request`, reporting progress fractions into `progress`.
    pub async fn upload_with_progress(
        &self,
        request: UploadRequest,
        progress: &ProgressSink,
    ) -> Result<Value> {
        let strategy = match &request.file {
            None => return Err(Error::UnsupportedInput("No file".to_string())),
            Some(file) => {
                validate_file(file)?;
                self.select_strategy(file)
            }
        };

        if !request.has_field("filename") {
            return Err(Error::MissingFilename);
        }

        debug!(%strategy, "Selected upload transport");

        match strategy {
            Strategy::Streaming => self.streaming.send(request, progress).await,
            Strategy::LegacyForm => self.legacy.send(request, progress).await,
        }
    }
}

fn validate_file(file: &FileHandle) -> Result<()> {
    match file {
        FileHandle::Blob(_) => Ok(()),
        FileHandle::Reference(path) if path.is_file() => Ok(()),
        FileHandle::Reference(path) => Err(Error::UnsupportedInput(format!(
            "{} is not a readable file",
            path.display()
        ))),
    }
}
