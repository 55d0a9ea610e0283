//! Hidden form and receiving-frame surfaces for the legacy transport
//!
//! A host attaches a named receiving frame, accepts a form that targets it,
//! and reports what the frame loaded through an event channel. A freshly
//! attached frame always reports one blank `Ready` before any submission.

pub mod http;
pub mod mock;

pub use http::HttpSurfaceHost;
pub use mock::MockSurfaceHost;

use crate::models::FileHandle;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// What a receiving frame holds after a load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDocument {
    /// Reply already decoded by the host, when the response was JSON.
    pub structured: Option<Value>,
    /// Rendered document body.
    pub body: Option<String>,
}

impl FrameDocument {
    pub fn blank() -> Self {
        Self {
            structured: None,
            body: Some(String::new()),
        }
    }

    pub fn rendered(body: impl Into<String>) -> Self {
        Self {
            structured: None,
            body: Some(body.into()),
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            structured: Some(value),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FormField {
    Text { name: String, value: String },
    File { name: String, file: FileHandle },
}

impl FormField {
    pub fn name(&self) -> &str {
        match self {
            FormField::Text { name, .. } | FormField::File { name, .. } => name,
        }
    }
}

/// A multipart form posted to `action` whose reply lands in frame `target`.
#[derive(Debug, Clone)]
pub struct HiddenForm {
    pub action: String,
    pub target: String,
    pub fields: Vec<FormField>,
}

impl HiddenForm {
    pub fn new(action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: target.into(),
            fields: Vec::new(),
        }
    }

    pub fn push_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(FormField::Text {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn push_file(&mut self, name: impl Into<String>, file: FileHandle) {
        self.fields.push(FormField::File {
            name: name.into(),
            file,
        });
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(FormField::name).collect()
    }

    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.fields.iter().find_map(|field| match field {
            FormField::Text { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Ready(FrameDocument),
    LoadFailed(String),
}

pub type SurfaceEvents = UnboundedReceiver<SurfaceEvent>;

#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// Attach a receiving frame named `frame_id` and subscribe to its loads.
    async fn attach(&self, frame_id: &str) -> Result<SurfaceEvents>;

    /// Submit `form` into the frame. The reply arrives as a later event.
    async fn submit(&self, frame_id: &str, form: HiddenForm) -> Result<()>;

    /// Release the frame and anything still running for it.
    fn detach(&self, frame_id: &str);
}
