use super::{finish, require_filename, token_failure};
use crate::models::{ApiError, Blob, FileHandle, UploadRequest};
use crate::parser::{self, RawResponse};
use crate::progress::ProgressSink;
use crate::token::TokenProvider;
use crate::{Error, Result};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde_json::Value;
use std::sync::Arc;

/// Size of the body chunks handed to the HTTP client; one progress event
/// is emitted per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Streams a blob to the API as a single multipart request.
pub struct StreamingTransport {
    client: Client,
    api_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl StreamingTransport {
    pub fn new(client: Client, api_url: String, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            api_url,
            tokens,
        }
    }

    pub async fn send(&self, request: UploadRequest, progress: &ProgressSink) -> Result<Value> {
        require_filename(&request)?;

        let fields: Vec<(String, String)> = request
            .allowed_fields()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        let blob = match request.file {
            Some(FileHandle::Blob(blob)) => blob,
            Some(FileHandle::Reference(path)) => {
                return Err(Error::UnsupportedInput(format!(
                    "{} is a file reference, streaming needs a blob",
                    path.display()
                )))
            }
            None => return Err(Error::UnsupportedInput("No file".to_string())),
        };
        let file_name = blob.name.clone();
        let file_size = blob.len();

        // The token is fetched while the body is assembled; nothing is sent
        // before it resolves.
        let sink = progress.attempt();
        let (token, form) = tokio::join!(self.tokens.token(), async move {
            build_form(&fields, blob, sink)
        });
        let token = token.map_err(|e| token_failure(self.tokens.as_ref(), e))?;
        let form = form?.text("token", token);

        tracing::debug!(file = %file_name, size = file_size, "Streaming upload");

        let response = self
            .client
            .post(&self.api_url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_failure)?;
        let reply = parser::parse(RawResponse::Text {
            status: Some(status),
            body,
        });

        let result = finish(reply, self.tokens.as_ref());
        if result.is_ok() {
            tracing::info!(file = %file_name, size = file_size, "Upload complete");
        }
        result
    }
}

fn build_form(fields: &[(String, String)], blob: Blob, progress: ProgressSink) -> Result<Form> {
    let mut form = Form::new().text("action", "upload").text("format", "json");
    for (key, value) in fields {
        form = form.text(key.clone(), value.clone());
    }

    let total = blob.len() as u64;
    let mut part = Part::stream_with_length(progress_body(blob.data, progress), total)
        .file_name(blob.name);
    if let Some(mime_type) = &blob.mime_type {
        part = part
            .mime_str(mime_type)
            .map_err(|_| Error::UnsupportedInput(format!("invalid MIME type {}", mime_type)))?;
    }

    Ok(form.part("file", part))
}

/// Body that reports progress as the HTTP client pulls each chunk.
fn progress_body(data: Bytes, progress: ProgressSink) -> Body {
    let total = data.len() as u64;
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..(start + CHUNK_SIZE).min(data.len())))
        .collect();

    let mut sent = 0u64;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress.report(sent, total);
        Ok::<Bytes, std::io::Error>(chunk)
    });

    Body::wrap_stream(stream)
}

fn transport_failure(e: reqwest::Error) -> Error {
    tracing::error!("Upload request failed: {}", e);
    let reply = parser::failure_reply(e.status().map(|s| s.as_u16()), &e.to_string());
    Error::TransportFailure(ApiError::from_value(&reply["error"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::MockTokenProvider;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_transport(api_url: String, tokens: &MockTokenProvider) -> StreamingTransport {
        StreamingTransport::new(Client::new(), api_url, Arc::new(tokens.clone()))
    }

    fn png_request() -> UploadRequest {
        UploadRequest::new(Blob::new("a.png", vec![0x89u8; 10])).field("filename", "a.png")
    }

    async fn mount_reply(server: &MockServer, reply: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/w/api.php"))
            .respond_with(reply)
            .mount(server)
            .await;
    }

    fn api_url(server: &MockServer) -> String {
        format!("{}/w/api.php", server.uri())
    }

    #[tokio::test]
    async fn test_empty_reply_is_success() {
        let server = MockServer::start().await;
        mount_reply(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;
        let tokens = MockTokenProvider::new();

        let result = make_transport(api_url(&server), &tokens)
            .send(png_request(), &ProgressSink::disabled())
            .await
            .unwrap();

        assert_eq!(result, json!({}));
        assert_eq!(tokens.get_token_count(), 1);
        assert_eq!(tokens.get_invalidate_count(), 0);
    }

    #[tokio::test]
    async fn test_fields_are_sent_in_order_with_token_last() {
        let server = MockServer::start().await;
        mount_reply(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;
        let tokens = MockTokenProvider::new().with_token("tok+\\".to_string());

        let request = png_request()
            .field("comment", "Uploaded by bot")
            .field("format", "xml")
            .field("destination", "elsewhere");
        make_transport(api_url(&server), &tokens)
            .send(request, &ProgressSink::disabled())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body = String::from_utf8_lossy(&requests[0].body).to_string();

        let order: Vec<usize> = [
            "name=\"action\"",
            "name=\"format\"",
            "name=\"filename\"",
            "name=\"comment\"",
            "name=\"file\"; filename=\"a.png\"",
            "name=\"token\"",
        ]
        .iter()
        .map(|needle| body.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
        .collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);

        assert!(!body.contains("destination"));
        assert!(!body.contains("xml"));
        assert!(body.contains("tok+\\"));
    }

    #[tokio::test]
    async fn test_bad_token_reply_invalidates_once() {
        let server = MockServer::start().await;
        mount_reply(
            &server,
            ResponseTemplate::new(200).set_body_json(
                json!({"error": {"code": "badtoken", "info": "Token invalid"}}),
            ),
        )
        .await;
        let tokens = MockTokenProvider::new();

        let err = make_transport(api_url(&server), &tokens)
            .send(png_request(), &ProgressSink::disabled())
            .await
            .unwrap_err();

        assert_eq!(err.api_code(), Some("badtoken"));
        assert!(matches!(err, Error::ServerError(_)));
        assert_eq!(tokens.get_invalidate_count(), 1);
    }

    #[tokio::test]
    async fn test_non_json_error_page_becomes_server_error() {
        let server = MockServer::start().await;
        mount_reply(
            &server,
            ResponseTemplate::new(500).set_body_string("Internal Server Error"),
        )
        .await;
        let tokens = MockTokenProvider::new();

        let err = make_transport(api_url(&server), &tokens)
            .send(png_request(), &ProgressSink::disabled())
            .await
            .unwrap_err();

        match err {
            Error::ServerError(api) => {
                assert_eq!(api.code, "http");
                assert_eq!(api.info, "Internal Server Error");
                assert_eq!(api.extra.get("status"), Some(&json!(500)));
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_token_failure_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;
        let tokens = MockTokenProvider::new().with_failure(true);

        let err = make_transport(api_url(&server), &tokens)
            .send(png_request(), &ProgressSink::disabled())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransportFailure(_)));
        assert_eq!(tokens.get_invalidate_count(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_is_transport_failure() {
        let tokens = MockTokenProvider::new();

        let err = make_transport("http://127.0.0.1:1/w/api.php".to_string(), &tokens)
            .send(png_request(), &ProgressSink::disabled())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransportFailure(ref api) if api.code == "http"));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_reaches_one() {
        let server = MockServer::start().await;
        mount_reply(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;
        let tokens = MockTokenProvider::new();
        let (sink, mut rx) = ProgressSink::channel();

        let request = UploadRequest::new(Blob::new("big.bin", vec![1u8; CHUNK_SIZE * 3 + 17]))
            .field("filename", "big.bin");
        make_transport(api_url(&server), &tokens)
            .send(request, &sink)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(value) = rx.try_recv() {
            events.push(value);
        }

        assert_eq!(events.len(), 4);
        assert!(events.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(events.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(events.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn test_reused_sink_reports_every_upload() {
        let server = MockServer::start().await;
        mount_reply(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;
        let tokens = MockTokenProvider::new();
        let transport = make_transport(api_url(&server), &tokens);
        let (sink, mut rx) = ProgressSink::channel();

        let mut runs = Vec::new();
        for _ in 0..2 {
            let request = UploadRequest::new(Blob::new("big.bin", vec![1u8; CHUNK_SIZE * 4]))
                .field("filename", "big.bin");
            transport.send(request, &sink).await.unwrap();

            let mut events = Vec::new();
            while let Ok(value) = rx.try_recv() {
                events.push(value);
            }
            runs.push(events);
        }

        assert_eq!(runs[0], vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(runs[1], vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[tokio::test]
    async fn test_mime_type_is_sent_with_the_file() {
        let server = MockServer::start().await;
        mount_reply(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;
        let tokens = MockTokenProvider::new();

        let request =
            UploadRequest::new(Blob::new("a.png", vec![0x89u8; 10]).with_mime_type("image/png"))
                .field("filename", "a.png");
        make_transport(api_url(&server), &tokens)
            .send(request, &ProgressSink::disabled())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_lowercase();
        assert!(body.contains("content-type: image/png"));
    }

    #[tokio::test]
    async fn test_invalid_mime_type_is_unsupported_and_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;
        let tokens = MockTokenProvider::new();

        let blob = Blob::new("a.png", vec![1u8]).with_mime_type("not a mime");
        let request = UploadRequest::new(blob).field("filename", "a.png");
        let err = make_transport(api_url(&server), &tokens)
            .send(request, &ProgressSink::disabled())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedInput(_)));
        assert_eq!(tokens.get_invalidate_count(), 0);
    }

    #[tokio::test]
    async fn test_token_failure_wins_over_form_failure() {
        let tokens = MockTokenProvider::new().with_failure(true);

        let blob = Blob::new("a.png", vec![1u8]).with_mime_type("not a mime");
        let request = UploadRequest::new(blob).field("filename", "a.png");
        let err = make_transport("http://127.0.0.1:1/w/api.php".to_string(), &tokens)
            .send(request, &ProgressSink::disabled())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransportFailure(ref api) if api.code == "http"));
        assert_eq!(tokens.get_invalidate_count(), 1);
    }

    #[tokio::test]
    async fn test_file_reference_is_rejected() {
        let tokens = MockTokenProvider::new();
        let request = UploadRequest::new(PathBuf::from("/tmp/a.png")).field("filename", "a.png");

        let err = make_transport("http://127.0.0.1:1".to_string(), &tokens)
            .send(request, &ProgressSink::disabled())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedInput(_)));
        assert_eq!(tokens.get_token_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_filename_is_rejected_before_token() {
        let tokens = MockTokenProvider::new();
        let request = UploadRequest::new(Blob::new("a.png", vec![1])).field("comment", "x");

        let err = make_transport("http://127.0.0.1:1".to_string(), &tokens)
            .send(request, &ProgressSink::disabled())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingFilename));
        assert_eq!(tokens.get_token_count(), 0);
    }
}
