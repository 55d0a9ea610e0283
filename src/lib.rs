//! Upload client for the MediaWiki action API
//!
//! Sends a file to `action=upload` with a CSRF token attached, streaming it
//! as a multipart body when possible and falling back to a hidden form
//! submission otherwise, and normalizes the API's reply into success,
//! warning, or error.

pub mod error;
pub mod models;
pub mod parser;
pub mod probe;
pub mod progress;
pub mod surface;
pub mod token;
pub mod transport;
pub mod uploader;

pub use error::{Error, Result};
pub use models::{Blob, Config, FileHandle, UploadRequest};
pub use progress::ProgressSink;
pub use uploader::{Uploader, UploaderServices};
