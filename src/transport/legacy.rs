use super::{finish, require_filename, token_failure, CorrelationIds};
use crate::models::UploadRequest;
use crate::parser;
use crate::progress::ProgressSink;
use crate::surface::{FrameDocument, HiddenForm, SurfaceEvent, SurfaceHost};
use crate::token::TokenProvider;
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;

/// Lifecycle of the receiving frame for one upload.
///
/// The frame signals `Ready` once on attach with nothing in it. Only the
/// second `Ready`, after the form went out, carries the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    AwaitingReply,
    Done,
}

/// Detaches the frame when dropped, whatever the exit path.
struct AttachedFrame<'a> {
    host: &'a dyn SurfaceHost,
    id: String,
}

impl Drop for AttachedFrame<'_> {
    fn drop(&mut self) {
        self.host.detach(&self.id);
    }
}

/// Uploads by submitting a hidden form into a hidden receiving frame.
pub struct LegacyFormTransport {
    api_url: String,
    host: Arc<dyn SurfaceHost>,
    tokens: Arc<dyn TokenProvider>,
    ids: CorrelationIds,
}

impl LegacyFormTransport {
    pub fn new(
        api_url: String,
        host: Arc<dyn SurfaceHost>,
        tokens: Arc<dyn TokenProvider>,
        ids: CorrelationIds,
    ) -> Self {
        Self {
            api_url,
            host,
            tokens,
            ids,
        }
    }

    pub async fn send(&self, request: UploadRequest, progress: &ProgressSink) -> Result<Value> {
        require_filename(&request)?;

        let frame_id = self.ids.next_frame_id();
        let form = self.build_form(request, &frame_id)?;

        let mut events = self.host.attach(&frame_id).await?;
        let _frame = AttachedFrame {
            host: self.host.as_ref(),
            id: frame_id.clone(),
        };

        let mut pending = Some(form);
        let mut state = FrameState::Idle;

        let document = loop {
            let event = events.recv().await.ok_or_else(|| {
                Error::LoadFailure(format!("frame {} closed before replying", frame_id))
            })?;
            tracing::debug!(frame = %frame_id, ?state, "Receiving frame event");

            match (state, event) {
                (_, SurfaceEvent::LoadFailed(reason)) => {
                    tracing::error!(frame = %frame_id, "Receiving frame failed to load: {}", reason);
                    return Err(Error::LoadFailure(reason));
                }
                (FrameState::Idle, SurfaceEvent::Ready(_)) => {
                    state = FrameState::AwaitingReply;
                    if let Some(form) = pending.take() {
                        self.submit_with_token(&frame_id, form).await?;
                    }
                }
                (FrameState::AwaitingReply | FrameState::Done, SurfaceEvent::Ready(document)) => {
                    state = FrameState::Done;
                    break document;
                }
            }
        };
        tracing::debug!(frame = %frame_id, ?state, "Reply received");

        let reply = read_reply(document).ok_or(Error::NoResponse)?;
        let value = finish(reply, self.tokens.as_ref())?;

        progress.attempt().complete();
        tracing::info!(frame = %frame_id, "Upload complete");
        Ok(value)
    }

    fn build_form(&self, request: UploadRequest, frame_id: &str) -> Result<HiddenForm> {
        let mut form = HiddenForm::new(self.api_url.clone(), frame_id);
        form.push_text("action", "upload");
        form.push_text("format", "json");

        let allowed: Vec<(String, String)> = request
            .allowed_fields()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        let file = request
            .file
            .ok_or_else(|| Error::UnsupportedInput("No file".to_string()))?;
        form.push_file("file", file);

        for (key, value) in allowed {
            form.push_text(key, value);
        }
        Ok(form)
    }

    async fn submit_with_token(&self, frame_id: &str, mut form: HiddenForm) -> Result<()> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| token_failure(self.tokens.as_ref(), e))?;
        form.push_text("token", token);

        tracing::debug!(frame = %frame_id, "Submitting upload form");
        self.host.submit(frame_id, form).await
    }
}

/// Structured reply if the frame has one, else its body decoded as JSON,
/// else JSON from its `<pre>` text.
fn read_reply(document: FrameDocument) -> Option<Value> {
    if let Some(value) = document.structured.filter(|value| !value.is_null()) {
        return Some(value);
    }

    let body = document.body?;
    serde_json::from_str::<Value>(body.trim())
        .ok()
        .filter(|value| !value.is_null())
        .or_else(|| parser::extract_from_document(&body))
}
