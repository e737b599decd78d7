//! Credential provider boundary and in-process token cache.
//!
//! Token acquisition (interactive consent, secure storage) lives
//! outside this crate; the adapter only needs something that can hand
//! out a bearer token and mint a fresh one when the current token is
//! rejected.

use crate::error::{FsError, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

/// External credential provider.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token.
    async fn access_token(&self) -> Result<String>;

    /// Mint a fresh token after the current one was rejected.
    /// Fails `PermissionDenied` when the grant has been revoked.
    async fn refresh(&self) -> Result<String>;
}

struct TokenState {
    token: Option<String>,
    /// Bumped on every successful refresh so concurrent callers can
    /// tell whether someone else already replaced the token they saw.
    generation: u64,
}

/// Process-wide token cache with single-flight refresh.
///
/// One credential per adapter instance. Concurrent 401s trigger at
/// most one refresh against the provider; every other caller blocks
/// on the same lock and picks up the replacement token.
pub struct TokenManager {
    provider: Arc<dyn TokenProvider>,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(TokenState {
                token: None,
                generation: 0,
            }),
        }
    }

    /// Current bearer token plus the generation it belongs to.
    pub async fn bearer(&self) -> Result<(String, u64)> {
        let mut state = self.state.lock().await;
        let token = match &state.token {
            Some(token) => token.clone(),
            None => {
                debug!("No cached token, fetching from provider");
                let token = self.provider.access_token().await?;
                state.token = Some(token.clone());
                token
            }
        };
        Ok((token, state.generation))
    }

    /// Replace the token the caller observed at `seen_generation`.
    ///
    /// If another caller refreshed in the meantime, the already-fresh
    /// token is returned without touching the provider again.
    pub async fn refresh_after(&self, seen_generation: u64) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.generation > seen_generation {
            if let Some(token) = &state.token {
                debug!("Token already refreshed by a concurrent caller");
                return Ok(token.clone());
            }
        }
        warn!("Token rejected by the service, refreshing");
        let token = self.provider.refresh().await?;
        state.token = Some(token.clone());
        state.generation += 1;
        Ok(token)
    }
}

/// Fixed token sequence, for tests and non-expiring credentials.
///
/// Hands out the tokens in order, advancing on every `refresh` call;
/// refreshing past the end fails `PermissionDenied`.
pub struct StaticTokens {
    tokens: Vec<String>,
    cursor: std::sync::Mutex<usize>,
}

impl StaticTokens {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            cursor: std::sync::Mutex::new(0),
        }
    }

    pub fn single(token: impl Into<String>) -> Self {
        Self::new(vec![token.into()])
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn access_token(&self) -> Result<String> {
        let cursor = *self.cursor.lock().unwrap();
        self.tokens
            .get(cursor)
            .cloned()
            .ok_or_else(|| FsError::PermissionDenied("no token available".to_string()))
    }

    async fn refresh(&self) -> Result<String> {
        let mut cursor = self.cursor.lock().unwrap();
        *cursor += 1;
        self.tokens
            .get(*cursor)
            .cloned()
            .ok_or_else(|| FsError::PermissionDenied("token refresh denied".to_string()))
    }
}
