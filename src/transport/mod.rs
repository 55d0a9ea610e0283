//! Upload transports
//!
//! Two ways of getting a file to the API: a streamed multipart request with
//! per-chunk progress, and a hidden form submitted into a receiving frame
//! for environments without streaming bodies. Both send the same fields
//! and share reply handling.

pub mod legacy;
pub mod streaming;

pub use legacy::LegacyFormTransport;
pub use streaming::StreamingTransport;

use crate::models::{ApiError, UploadRequest, HTTP_ERROR_CODE};
use crate::parser;
use crate::token::TokenProvider;
use crate::{Error, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transport chosen for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Streaming,
    LegacyForm,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Streaming => write!(f, "streaming"),
            Strategy::LegacyForm => write!(f, "legacy-form"),
        }
    }
}

/// Monotonic source of receiving-frame names. Clones share the sequence.
#[derive(Debug, Clone, Default)]
pub struct CorrelationIds {
    next: std::sync::Arc<AtomicU64>,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_frame_id(&self) -> String {
        format!("uploadframe-{}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) fn require_filename(request: &UploadRequest) -> Result<()> {
    if request.has_field("filename") {
        Ok(())
    } else {
        Err(Error::MissingFilename)
    }
}

/// Classify a decoded reply, dropping the token when the server rejected it.
pub(crate) fn finish(reply: Value, tokens: &dyn TokenProvider) -> Result<Value> {
    match parser::classify(reply) {
        Err(Error::ServerError(api)) => {
            if api.is_bad_token() {
                tracing::warn!("Server rejected the upload token");
                tokens.invalidate();
            } else {
                tracing::error!(code = %api.code, info = %api.info, "Upload rejected by API");
            }
            Err(Error::ServerError(api))
        }
        Err(Error::ServerWarning(details)) => {
            tracing::warn!(warnings = %details, "Upload returned warnings");
            Err(Error::ServerWarning(details))
        }
        other => other,
    }
}

/// Token acquisition failed: drop whatever the provider holds and report a
/// transport failure without sending anything.
pub(crate) fn token_failure(tokens: &dyn TokenProvider, cause: Error) -> Error {
    tracing::error!("Could not acquire upload token: {}", cause);
    tokens.invalidate();
    Error::TransportFailure(ApiError::new(HTTP_ERROR_CODE, cause.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Blob;
    use crate::token::MockTokenProvider;
    use serde_json::json;

    #[test]
    fn test_correlation_ids_are_unique_and_shared_across_clones() {
        let ids = CorrelationIds::new();
        let clone = ids.clone();

        assert_eq!(ids.next_frame_id(), "uploadframe-0");
        assert_eq!(clone.next_frame_id(), "uploadframe-1");
        assert_eq!(ids.next_frame_id(), "uploadframe-2");
    }

    #[test]
    fn test_correlation_ids_are_unique_across_threads() {
        let ids = CorrelationIds::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..100).map(|_| ids.next_frame_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 400);
    }

    #[test]
    fn test_require_filename() {
        let with = UploadRequest::new(Blob::new("a.png", vec![1])).field("filename", "a.png");
        let without = UploadRequest::new(Blob::new("a.png", vec![1])).field("comment", "hi");

        assert!(require_filename(&with).is_ok());
        assert!(matches!(require_filename(&without), Err(Error::MissingFilename)));
    }

    #[test]
    fn test_finish_invalidates_only_on_bad_token() {
        let tokens = MockTokenProvider::new();

        let err = finish(
            json!({"error": {"code": "badtoken", "info": "Invalid token"}}),
            &tokens,
        )
        .unwrap_err();
        assert_eq!(err.api_code(), Some("badtoken"));
        assert_eq!(tokens.get_invalidate_count(), 1);

        finish(json!({"error": {"code": "permissiondenied", "info": "no"}}), &tokens)
            .unwrap_err();
        finish(json!({"warnings": {"exists": "A.png"}}), &tokens).unwrap_err();
        finish(json!({"upload": {}}), &tokens).unwrap();
        assert_eq!(tokens.get_invalidate_count(), 1);
    }

    #[test]
    fn test_token_failure_invalidates_and_reports_transport_error() {
        let tokens = MockTokenProvider::new();
        let err = token_failure(&tokens, Error::Token("offline".to_string()));

        assert_eq!(tokens.get_invalidate_count(), 1);
        assert!(matches!(err, Error::TransportFailure(ref api) if api.code == "http"));
    }
}
