//! OAuth access-token refresh for stored catalog accounts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use datafy_store::{AccountStore, StoredAccount, TokenUpdate};
use serde::Deserialize;
use tracing::{debug, error, warn};

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Tokens expiring within this window are refreshed ahead of use.
pub const FRESHNESS_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedAccount {
    pub user_id: String,
    pub provider_account_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Produces a usable bearer token for an account, or `None` when the account
/// cannot be used this run.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, account: &StoredAccount) -> Option<RefreshedAccount>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenRefresherConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

pub struct SpotifyTokenRefresher {
    client: reqwest::Client,
    config: TokenRefresherConfig,
    accounts: Arc<dyn AccountStore>,
}

impl SpotifyTokenRefresher {
    pub fn new(config: TokenRefresherConfig, accounts: Arc<dyn AccountStore>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building token client")?;
        Ok(Self {
            client,
            config,
            accounts,
        })
    }

    async fn request_token(&self, refresh_token: &str) -> anyhow::Result<TokenResponse> {
        let resp = self
            .client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .context("sending token refresh request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("token endpoint returned {status}: {body}");
        }
        resp.json::<TokenResponse>()
            .await
            .context("decoding token refresh response")
    }
}

#[async_trait]
impl TokenRefresher for SpotifyTokenRefresher {
    async fn refresh(&self, account: &StoredAccount) -> Option<RefreshedAccount> {
        let now = Utc::now().timestamp();
        if let (Some(access_token), Some(expires_at)) = (&account.access_token, account.expires_at) {
            if expires_at - now > FRESHNESS_MARGIN_SECS {
                debug!(user_id = %account.user_id, "stored access token still valid");
                return Some(RefreshedAccount {
                    user_id: account.user_id.clone(),
                    provider_account_id: account.provider_account_id.clone(),
                    access_token: access_token.clone(),
                    refresh_token: account.refresh_token.clone(),
                });
            }
        }

        let Some(refresh_token) = account.refresh_token.as_deref() else {
            warn!(user_id = %account.user_id, "access token expired and no refresh token stored");
            return None;
        };

        let token = match self.request_token(refresh_token).await {
            Ok(token) => token,
            Err(err) => {
                warn!(user_id = %account.user_id, error = %err, "error refreshing access token");
                return None;
            }
        };

        let rotated = token
            .refresh_token
            .clone()
            .unwrap_or_else(|| refresh_token.to_string());
        let update = TokenUpdate {
            access_token: token.access_token.clone(),
            refresh_token: Some(rotated.clone()),
            expires_at: now + token.expires_in,
        };
        if let Err(err) = self
            .accounts
            .update_tokens(&account.provider, &account.provider_account_id, &update)
            .await
        {
            error!(user_id = %account.user_id, error = %err, "failed to persist refreshed tokens");
        }

        Some(RefreshedAccount {
            user_id: account.user_id.clone(),
            provider_account_id: account.provider_account_id.clone(),
            access_token: token.access_token,
            refresh_token: Some(rotated),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use datafy_store::MemoryAccountStore;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    fn account(access_token: Option<&str>, refresh_token: Option<&str>, expires_in: i64) -> StoredAccount {
        StoredAccount {
            user_id: "u1".into(),
            provider: "spotify".into(),
            provider_account_id: "sp-u1".into(),
            access_token: access_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: Some(Utc::now().timestamp() + expires_in),
            scope: None,
        }
    }

    fn refresher(token_url: String, store: &MemoryAccountStore) -> SpotifyTokenRefresher {
        SpotifyTokenRefresher::new(
            TokenRefresherConfig {
                token_url,
                client_id: "client".into(),
                client_secret: "secret".into(),
                timeout: Duration::from_secs(2),
                user_agent: None,
            },
            Arc::new(store.clone()),
        )
        .unwrap()
    }

    async fn token_server(response: Value) -> String {
        let app = Router::new().route(
            "/token",
            post(move |headers: HeaderMap, body: String| {
                let response = response.clone();
                async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.starts_with("Basic "));
                    if authorized && body.contains("grant_type=refresh_token") {
                        Json(response)
                    } else {
                        Json(json!({"error": "invalid_request"}))
                    }
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    #[tokio::test]
    async fn fresh_token_is_reused_without_network() {
        let stored = account(Some("still-good"), Some("r1"), 3_600);
        let store = MemoryAccountStore::new(vec![stored.clone()]);
        let refresher = refresher("http://127.0.0.1:9/token".into(), &store);

        let refreshed = refresher.refresh(&stored).await.unwrap();
        assert_eq!(refreshed.access_token, "still-good");
        assert_eq!(store.accounts()[0], stored);
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_fails() {
        let stored = account(Some("stale"), None, -10);
        let store = MemoryAccountStore::new(vec![stored.clone()]);
        let refresher = refresher("http://127.0.0.1:9/token".into(), &store);

        assert!(refresher.refresh(&stored).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_fails_refresh() {
        let stored = account(Some("stale"), Some("r1"), 30);
        let store = MemoryAccountStore::new(vec![stored.clone()]);
        let refresher = refresher("http://127.0.0.1:9/token".into(), &store);

        assert!(refresher.refresh(&stored).await.is_none());
        assert_eq!(store.accounts()[0].access_token.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_persisted() {
        let url = token_server(json!({
            "access_token": "new-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "r2",
            "scope": "user-top-read"
        }))
        .await;
        let stored = account(Some("stale"), Some("r1"), -10);
        let store = MemoryAccountStore::new(vec![stored.clone()]);
        let refresher = refresher(url, &store);

        let refreshed = refresher.refresh(&stored).await.unwrap();
        assert_eq!(refreshed.access_token, "new-access");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r2"));

        let persisted = &store.accounts()[0];
        assert_eq!(persisted.access_token.as_deref(), Some("new-access"));
        assert_eq!(persisted.refresh_token.as_deref(), Some("r2"));
        assert!(persisted.expires_at.unwrap() > Utc::now().timestamp() + 3_000);
    }

    #[tokio::test]
    async fn missing_rotation_keeps_previous_refresh_token() {
        let url = token_server(json!({"access_token": "new-access", "expires_in": 3600})).await;
        let stored = account(None, Some("r1"), -10);
        let store = MemoryAccountStore::new(vec![stored.clone()]);
        let refresher = refresher(url, &store);

        let refreshed = refresher.refresh(&stored).await.unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r1"));
        assert_eq!(store.accounts()[0].refresh_token.as_deref(), Some("r1"));
    }
}
