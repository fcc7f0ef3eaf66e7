//! OAuth token lookup for private repository access.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::services::crypto::TokenCipher;

/// Provider name used for GitHub accounts.
pub const PROVIDER_GITHUB: &str = "github";

#[derive(Debug, thiserror::Error)]
pub enum TokenLookupError {
    /// No account for the pair, or its token is empty. Callers fall back to
    /// anonymous access.
    #[error("oauth token not found")]
    NotFound,

    #[error(transparent)]
    Failed(#[from] AppError),
}

#[async_trait]
pub trait TokenLookup: Send + Sync {
    async fn get_oauth_token(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<SecretString, TokenLookupError>;
}

/// Reads encrypted tokens from `oauth_accounts` and decrypts them.
#[derive(Clone, Debug)]
pub struct OAuthTokenStore {
    pool: DbPool,
    cipher: TokenCipher,
}

impl OAuthTokenStore {
    pub fn new(pool: DbPool, cipher: TokenCipher) -> Self {
        Self { pool, cipher }
    }
}

#[async_trait]
impl TokenLookup for OAuthTokenStore {
    async fn get_oauth_token(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<SecretString, TokenLookupError> {
        if user_id.is_empty() {
            return Err(AppError::InvalidInput("user ID is required".to_string()).into());
        }
        if provider.is_empty() {
            return Err(AppError::InvalidInput("provider is required".to_string()).into());
        }

        let user_id = Uuid::parse_str(user_id).map_err(|e| {
            AppError::InvalidInput(format!("invalid user ID format: {}", e))
        })?;

        let encrypted = self
            .pool
            .get_encrypted_access_token(user_id, provider)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or(TokenLookupError::NotFound)?;

        let token = self.cipher.decrypt(&encrypted)?;
        if token.expose_secret().is_empty() {
            return Err(TokenLookupError::NotFound);
        }
        Ok(token)
    }
}
