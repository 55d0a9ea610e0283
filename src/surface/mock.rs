use super::{FrameDocument, HiddenForm, SurfaceEvent, SurfaceEvents, SurfaceHost};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

#[derive(Clone)]
pub struct MockSurfaceHost {
    replies: Arc<Mutex<VecDeque<SurfaceEvent>>>,
    attach_failure: Arc<Mutex<Option<String>>>,
    frames: Arc<Mutex<HashMap<String, UnboundedSender<SurfaceEvent>>>>,
    attached: Arc<Mutex<Vec<String>>>,
    detached: Arc<Mutex<Vec<String>>>,
    submitted: Arc<Mutex<Vec<HiddenForm>>>,
}

impl MockSurfaceHost {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            attach_failure: Arc::new(Mutex::new(None)),
            frames: Arc::new(Mutex::new(HashMap::new())),
            attached: Arc::new(Mutex::new(Vec::new())),
            detached: Arc::new(Mutex::new(Vec::new())),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue the document loaded after the next submission.
    pub fn with_reply(self, document: FrameDocument) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(SurfaceEvent::Ready(document));
        self
    }

    /// Queue a network failure for the next submission.
    pub fn with_load_failure(self, reason: String) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(SurfaceEvent::LoadFailed(reason));
        self
    }

    /// Make freshly attached frames fail instead of loading blank.
    pub fn with_attach_failure(self, reason: String) -> Self {
        *self.attach_failure.lock().unwrap() = Some(reason);
        self
    }

    pub fn get_attached(&self) -> Vec<String> {
        self.attached.lock().unwrap().clone()
    }

    pub fn get_detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }

    pub fn get_submitted(&self) -> Vec<HiddenForm> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn get_open_frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl Default for MockSurfaceHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SurfaceHost for MockSurfaceHost {
    async fn attach(&self, frame_id: &str) -> Result<SurfaceEvents> {
        let (tx, rx) = unbounded_channel();
        let first = match self.attach_failure.lock().unwrap().clone() {
            Some(reason) => SurfaceEvent::LoadFailed(reason),
            None => SurfaceEvent::Ready(FrameDocument::blank()),
        };
        let _ = tx.send(first);

        self.frames.lock().unwrap().insert(frame_id.to_string(), tx);
        self.attached.lock().unwrap().push(frame_id.to_string());
        Ok(rx)
    }

    async fn submit(&self, frame_id: &str, form: HiddenForm) -> Result<()> {
        let frames = self.frames.lock().unwrap();
        let tx = frames
            .get(frame_id)
            .ok_or_else(|| Error::LoadFailure(format!("frame {} is not attached", frame_id)))?;

        self.submitted.lock().unwrap().push(form);

        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            SurfaceEvent::Ready(FrameDocument::structured(
                json!({"upload": {"result": "Success"}}),
            ))
        });
        let _ = tx.send(reply);
        Ok(())
    }

    fn detach(&self, frame_id: &str) {
        self.frames.lock().unwrap().remove(frame_id);
        self.detached.lock().unwrap().push(frame_id.to_string());
    }
}
