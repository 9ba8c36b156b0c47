use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// A linked OAuth account as persisted by the sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAccount {
    pub user_id: String,
    pub provider: String,
    pub provider_account_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
}

/// Rotated credentials. A missing `refresh_token` keeps the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_accounts(
        &self,
        provider: &str,
        user_ids: &[String],
    ) -> Result<Vec<StoredAccount>, StoreError>;

    async fn update_tokens(
        &self,
        provider: &str,
        provider_account_id: &str,
        update: &TokenUpdate,
    ) -> Result<(), StoreError>;
}
