use super::TokenProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MockTokenProvider {
    token: Arc<Mutex<String>>,
    should_fail: Arc<Mutex<bool>>,
    token_count: Arc<Mutex<usize>>,
    invalidate_count: Arc<Mutex<usize>>,
}

impl MockTokenProvider {
    pub fn new() -> Self {
        Self {
            token: Arc::new(Mutex::new("mock-token+\\".to_string())),
            should_fail: Arc::new(Mutex::new(false)),
            token_count: Arc::new(Mutex::new(0)),
            invalidate_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_token(self, token: String) -> Self {
        *self.token.lock().unwrap() = token;
        self
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn get_token_count(&self) -> usize {
        *self.token_count.lock().unwrap()
    }

    pub fn get_invalidate_count(&self) -> usize {
        *self.invalidate_count.lock().unwrap()
    }
}

impl Default for MockTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn token(&self) -> Result<String> {
        *self.token_count.lock().unwrap() += 1;

        if *self.should_fail.lock().unwrap() {
            return Err(Error::Token("mock token failure".to_string()));
        }
        Ok(self.token.lock().unwrap().clone())
    }

    fn invalidate(&self) {
        *self.invalidate_count.lock().unwrap() += 1;
    }
}
