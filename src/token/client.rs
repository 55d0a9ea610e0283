use super::TokenProvider;
use crate::models::ApiError;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Mutex;

#[derive(Debug, Deserialize)]
struct TokensResponse {
    query: Option<TokensQuery>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct TokensQuery {
    tokens: Tokens,
}

#[derive(Debug, Deserialize)]
struct Tokens {
    csrftoken: Option<String>,
}

/// Fetches CSRF tokens from `action=query&meta=tokens` and caches the
/// current one until it is invalidated.
///
/// The HTTP client should be the one the transports use so the token is
/// bound to the same session cookies.
pub struct ApiTokenProvider {
    client: Client,
    api_url: String,
    cached: Mutex<Option<String>>,
}

impl ApiTokenProvider {
    pub fn new(client: Client, api_url: String) -> Self {
        Self {
            client,
            api_url,
            cached: Mutex::new(None),
        }
    }

    fn cached(&self) -> Option<String> {
        self.cached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn fetch(&self) -> Result<String> {
        tracing::debug!(api = %self.api_url, "Fetching csrf token");

        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("meta", "tokens"),
                ("type", "csrf"),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send token request: {}", e);
                e
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            tracing::error!("Token request failed (status {}): {}", status, error_text);
            return Err(Error::Token(format!(
                "token request failed (status {}): {}",
                status, error_text
            )));
        }

        let body: TokensResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(Error::Token(error.to_string()));
        }

        body.query
            .and_then(|query| query.tokens.csrftoken)
            .ok_or_else(|| Error::Token("no csrftoken in API response".to_string()))
    }
}

#[async_trait]
impl TokenProvider for ApiTokenProvider {
    async fn token(&self) -> Result<String> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let token = self.fetch().await?;
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(token)
    }

    fn invalidate(&self) {
        tracing::warn!("Invalidating cached csrf token");
        self.cached.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
