//! Authentication of the WebSocket upgrade request.
//!
//! A credential is looked up, in order, in the `Authorization: Bearer`
//! header, the `token` query parameter and the `session` cookie. The first
//! one found is handed to an [`Authenticator`], which maps it to a user id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use parley_core::ids::UserId;
use parley_store::SessionRepo;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials presented")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Pull the raw credential out of the upgrade request.
pub fn extract_credential(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_owned());
    }

    if let Some(token) = query.get("token").filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == "session" && !value.is_empty())
        .map(|(_, value)| value.to_owned())
}

/// Opaque tokens resolved against the `sessions` table.
pub struct SessionAuthenticator {
    sessions: SessionRepo,
}

impl SessionAuthenticator {
    pub fn new(sessions: SessionRepo) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let sessions = self.sessions.clone();
        let token = token.to_owned();
        let resolved = tokio::task::spawn_blocking(move || sessions.resolve(&token))
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        resolved.ok_or(AuthError::InvalidCredentials)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a decimal string.
    pub sub: String,
    pub exp: u64,
}

/// HS256 JSON Web Tokens whose `sub` claim is the user id.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "jwt rejected");
            AuthError::InvalidCredentials
        })?;
        data.claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidCredentials)
    }
}

/// Tries each authenticator in turn and accepts the first match.
#[derive(Clone, Default)]
pub struct AuthChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticators.push(Arc::new(authenticator));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }
}

#[async_trait]
impl Authenticator for AuthChain {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let mut last = AuthError::InvalidCredentials;
        for authenticator in &self.authenticators {
            match authenticator.authenticate(token).await {
                Ok(user_id) => return Ok(user_id),
                Err(AuthError::Backend(e)) => {
                    warn!(error = %e, "authenticator backend failed, trying next");
                    last = AuthError::Backend(e);
                }
                Err(e) => {
                    // A failed backend outranks a rejection from the next one.
                    if !matches!(last, AuthError::Backend(_)) {
                        last = e;
                    }
                }
            }
        }
        Err(last)
    }
}
