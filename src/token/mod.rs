//! Write-token acquisition
//!
//! Uploads must carry a short-lived CSRF token. Providers hand one out
//! asynchronously and drop it again when the server reports it as bad.

pub mod client;
pub mod mock;

pub use client::ApiTokenProvider;
pub use mock::MockTokenProvider;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token valid for one write request.
    async fn token(&self) -> Result<String>;

    /// Forget the current token so the next call fetches a fresh one.
    fn invalidate(&self);
}
