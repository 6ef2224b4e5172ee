use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mocka_client_core::{SessionRefresher, SubjectId, TokenStore};
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

use crate::client::parse_body;
use crate::endpoints::{AUTH_REFRESH_PATH, AuthTokens, RefreshRequest};

/// Exchanges the stored refresh token for a new token pair.
///
/// Every failure mode collapses to `false`; callers only care whether a
/// retry is worth attempting.
#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
    tokens: Arc<TokenStore>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        base_url: String,
        http: reqwest::Client,
        timeout: Duration,
        tokens: Arc<TokenStore>,
    ) -> Self {
        Self {
            base_url,
            http,
            timeout,
            tokens,
        }
    }

    pub async fn try_refresh(&self, subject: Option<&SubjectId>) -> bool {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            tracing::debug!("No refresh token stored; skipping refresh");
            return false;
        };
        let body = RefreshRequest {
            refresh_token,
            user_id: subject.cloned(),
            nameid: subject.cloned(),
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to encode refresh request");
                return false;
            }
        };

        let url = format!("{}{AUTH_REFRESH_PATH}", self.base_url);
        let response = match self
            .http
            .post(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .body(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, url = %url, "Token refresh request failed");
                return false;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::info!(status = status.as_u16(), "Token refresh rejected");
            return false;
        }
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to read token refresh response");
                return false;
            }
        };
        let Some(tokens) = parse_body(&bytes)
            .and_then(|value| serde_json::from_value::<AuthTokens>(value).ok())
        else {
            tracing::warn!("Token refresh response was not a token payload");
            return false;
        };
        let access_token = tokens.access_token.as_deref().filter(|token| !token.is_empty());
        let refresh_token = tokens.refresh_token.as_deref().filter(|token| !token.is_empty());
        if access_token.is_none() && refresh_token.is_none() {
            tracing::warn!("Token refresh response carried no tokens");
            return false;
        }

        let stored = self
            .tokens
            .replace_session(access_token, refresh_token, tokens.full_name());
        if let Err(error) = stored {
            tracing::warn!(error = %error, "Failed to persist refreshed tokens");
            return false;
        }
        tracing::debug!("Access token refreshed");
        true
    }
}

#[async_trait]
impl SessionRefresher for RefreshCoordinator {
    async fn try_refresh(&self, subject: Option<&SubjectId>) -> bool {
        RefreshCoordinator::try_refresh(self, subject).await
    }
}
