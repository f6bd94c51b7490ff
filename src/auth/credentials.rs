//! Bearer credential access for both channels and for authenticated REST calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::repositories::{KeyValueStore, TOKEN_KEY};

/// Source of the bearer token. Absence is a precondition failure for connecting,
/// never a retryable error.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Token persisted in the key-value store under [`TOKEN_KEY`].
#[derive(Clone)]
pub struct StoredCredentials {
    store: Arc<dyn KeyValueStore>,
}

impl StoredCredentials {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist the token handed out at login.
    pub fn save_token(&self, token: &str) -> AppResult<()> {
        self.store.set(TOKEN_KEY, token.trim())?;
        debug!("bearer token stored");
        Ok(())
    }

    /// Forget the token (logout).
    pub fn clear_token(&self) -> AppResult<()> {
        self.store.remove(TOKEN_KEY)
    }

    /// The stored token, or `MissingCredential`.
    pub fn require_token(&self) -> AppResult<String> {
        self.bearer_token().ok_or(AppError::MissingCredential)
    }

    /// `Authorization: Bearer <token>` when a token is stored, nothing otherwise.
    pub fn auth_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if let Some(token) = self.bearer_token() {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }
}

impl CredentialProvider for StoredCredentials {
    fn bearer_token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "failed to read bearer token");
                None
            }
        }
    }
}
