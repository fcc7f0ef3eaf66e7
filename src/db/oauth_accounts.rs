//! Database queries for OAuth accounts.

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entity::oauth_account::{self, Entity as OAuthAccount};
use crate::error::{AppError, AppResult};

use super::DbPool;

impl DbPool {
    /// Stored (encrypted) access token for `(user_id, provider)`.
    ///
    /// `None` when there is no account or the token column is NULL.
    pub async fn get_encrypted_access_token(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> AppResult<Option<String>> {
        let account = OAuthAccount::find()
            .filter(oauth_account::Column::UserId.eq(user_id))
            .filter(oauth_account::Column::Provider.eq(provider))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get OAuth account: {}", e)))?;

        Ok(account.and_then(|a| a.access_token))
    }
}
