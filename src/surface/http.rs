use super::{FormField, FrameDocument, HiddenForm, SurfaceEvent, SurfaceEvents, SurfaceHost};
use crate::models::FileHandle;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;

struct Frame {
    events: UnboundedSender<SurfaceEvent>,
    submission: Option<JoinHandle<()>>,
}

/// Native surface host: frames are entries in a table, submitting a form
/// posts it as a buffered multipart request and loads the reply into the
/// frame.
pub struct HttpSurfaceHost {
    client: Client,
    frames: Mutex<HashMap<String, Frame>>,
}

impl HttpSurfaceHost {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            frames: Mutex::new(HashMap::new()),
        }
    }

    /// Number of frames currently attached.
    pub fn attached_count(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn build_form(fields: Vec<FormField>) -> Result<Form> {
        let mut form = Form::new();
        for field in fields {
            form = match field {
                FormField::Text { name, value } => form.text(name, value),
                FormField::File { name, file } => form.part(name, Self::file_part(file).await?),
            };
        }
        Ok(form)
    }

    async fn file_part(file: FileHandle) -> Result<Part> {
        let file_name = file.file_name();
        match file {
            FileHandle::Reference(path) => {
                let data = tokio::fs::read(&path).await.map_err(|e| {
                    Error::LoadFailure(format!("cannot read {}: {}", path.display(), e))
                })?;
                Ok(Part::bytes(data).file_name(file_name))
            }
            FileHandle::Blob(blob) => {
                let part = Part::bytes(blob.data.to_vec()).file_name(file_name);
                match &blob.mime_type {
                    Some(mime) => part.mime_str(mime).map_err(|_| {
                        Error::UnsupportedInput(format!("invalid MIME type {}", mime))
                    }),
                    None => Ok(part),
                }
            }
        }
    }

    async fn load_reply(response: reqwest::Response) -> SurfaceEvent {
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("json"));

        match response.text().await {
            Ok(body) => {
                let structured = if is_json {
                    serde_json::from_str(&body).ok()
                } else {
                    None
                };
                SurfaceEvent::Ready(FrameDocument {
                    structured,
                    body: Some(body),
                })
            }
            Err(e) => SurfaceEvent::LoadFailed(e.to_string()),
        }
    }
}

#[async_trait]
impl SurfaceHost for HttpSurfaceHost {
    async fn attach(&self, frame_id: &str) -> Result<SurfaceEvents> {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        if frames.contains_key(frame_id) {
            return Err(Error::LoadFailure(format!(
                "frame {} is already attached",
                frame_id
            )));
        }

        let (tx, rx) = unbounded_channel();
        // An empty frame finishes loading as soon as it is attached.
        let _ = tx.send(SurfaceEvent::Ready(FrameDocument::blank()));
        frames.insert(
            frame_id.to_string(),
            Frame {
                events: tx,
                submission: None,
            },
        );

        tracing::debug!(frame = %frame_id, "Attached receiving frame");
        Ok(rx)
    }

    async fn submit(&self, frame_id: &str, form: HiddenForm) -> Result<()> {
        if form.target != frame_id {
            return Err(Error::LoadFailure(format!(
                "form targets {} but was submitted to {}",
                form.target, frame_id
            )));
        }

        let action = form.action;
        let multipart = Self::build_form(form.fields).await?;

        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        let frame = frames.get_mut(frame_id).ok_or_else(|| {
            Error::LoadFailure(format!("frame {} is not attached", frame_id))
        })?;

        let events = frame.events.clone();
        let client = self.client.clone();
        let frame_name = frame_id.to_string();

        let handle = tokio::spawn(async move {
            tracing::debug!(frame = %frame_name, action = %action, "Submitting form");
            let event = match client.post(&action).multipart(multipart).send().await {
                Ok(response) => Self::load_reply(response).await,
                Err(e) => {
                    tracing::error!(frame = %frame_name, "Form submission failed: {}", e);
                    SurfaceEvent::LoadFailed(e.to_string())
                }
            };
            let _ = events.send(event);
        });

        if let Some(previous) = frame.submission.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn detach(&self, frame_id: &str) {
        let removed = self
            .frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(frame_id);

        if let Some(frame) = removed {
            if let Some(submission) = frame.submission {
                submission.abort();
            }
            tracing::debug!(frame = %frame_id, "Detached receiving frame");
        }
    }
}

impl Drop for HttpSurfaceHost {
    fn drop(&mut self) {
        let frames = self.frames.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, frame) in frames.drain() {
            if let Some(submission) = frame.submission {
                submission.abort();
            }
        }
    }
}
