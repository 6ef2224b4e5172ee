use std::sync::Arc;
use std::time::Duration;

use mocka_client_core::{
    ApiError, ConfigError, SubjectId, TokenStore, TokenStoreError, decode_claims,
    normalize_base_url,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::refresh::RefreshCoordinator;
use crate::request::{MultipartUpload, PreparedRequest, RequestBody, RequestOptions};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MIN_TIMEOUT_MS: u64 = 250;
const FALLBACK_ERROR_MESSAGE: &str = "Request failed";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("mocka_client_config_invalid:{0}")]
    Config(#[from] ConfigError),
    #[error("mocka_client_invalid_path")]
    InvalidPath,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("mocka_request_failed:{message}")]
    Transport { message: String },
    #[error("mocka_request_cancelled")]
    Cancelled,
    #[error("mocka_request_encode_failed:{message}")]
    Encode { message: String },
    #[error("mocka_response_decode_failed:{message}")]
    Decode { message: String },
    #[error("mocka_token_store_failed:{0}")]
    Store(#[from] TokenStoreError),
}

impl RequestError {
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(error) => Some(error),
            _ => None,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.api_error().map(|error| error.status)
    }
}

/// Authenticated request layer: bearer attachment, one refresh-and-retry on
/// protected 401s, uniform [`ApiError`] on failure.
#[derive(Debug, Clone)]
pub struct MockaClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
    refresher: RefreshCoordinator,
}

impl MockaClient {
    pub fn new(config: ClientConfig, tokens: Arc<TokenStore>) -> Result<Self, RequestError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let timeout = Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS));
        let http = reqwest::Client::new();
        let refresher = RefreshCoordinator::new(
            base_url.clone(),
            http.clone(),
            timeout,
            Arc::clone(&tokens),
        );
        Ok(Self {
            base_url,
            timeout,
            http,
            tokens,
            refresher,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    #[must_use]
    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Absolute paths pass through; relative ones are joined onto the base
    /// url. Query pairs keep their order and `None` values are skipped.
    pub fn build_url(
        &self,
        path: &str,
        query: &[(String, Option<String>)],
    ) -> Result<String, RequestError> {
        build_url(&self.base_url, path, query)
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Value, RequestError> {
        self.request::<()>(Method::GET, path, None, options).await
    }

    pub async fn post<B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<Value, RequestError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body), options).await
    }

    pub async fn put<B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<Value, RequestError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(body), options).await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Value, RequestError> {
        self.request::<()>(Method::DELETE, path, None, options).await
    }

    /// Issues a JSON request. A successful body resolves to parsed JSON,
    /// then raw text, then `Null` when empty.
    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<Value, RequestError>
    where
        B: Serialize + ?Sized,
    {
        let body = match body {
            Some(body) => RequestBody::Json(serde_json::to_vec(body).map_err(|error| {
                RequestError::Encode {
                    message: error.to_string(),
                }
            })?),
            None => RequestBody::Empty,
        };
        self.dispatch(method, path, body, options).await
    }

    /// Multipart POST. Same bearer and retry contract as [`Self::request`].
    pub async fn upload(
        &self,
        path: &str,
        upload: MultipartUpload,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        self.dispatch(Method::POST, path, RequestBody::Multipart(upload), options)
            .await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let url = self.build_url(path, &options.query)?;
        let request = PreparedRequest::new(method, path, url, &options.headers, body)?;
        self.execute(&request, options.cancel.as_ref()).await
    }

    async fn execute(
        &self,
        request: &PreparedRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, RequestError> {
        let initial_bearer = self.tokens.access_token();
        let response = self
            .send_once(request, initial_bearer.as_deref(), cancel)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED || !request.refresh_eligible() {
            return resolve_response(response).await;
        }

        let subject = initial_bearer
            .as_deref()
            .and_then(decode_claims)
            .and_then(|claims| claims.subject());
        if !self.refresh_detached(subject, cancel).await? {
            return resolve_response(response).await;
        }

        // Second and final attempt.
        let retry_bearer = self.tokens.access_token().or(initial_bearer);
        tracing::debug!(path = %request.path, "Retrying request after token refresh");
        let retried = self
            .send_once(request, retry_bearer.as_deref(), cancel)
            .await?;
        resolve_response(retried).await
    }

    // The exchange runs on its own task so cancelling or dropping the
    // request that triggered it cannot abort it halfway. A cancelled caller
    // stops waiting; the task still stores whatever the server returns.
    async fn refresh_detached(
        &self,
        subject: Option<SubjectId>,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool, RequestError> {
        let refresher = self.refresher.clone();
        let task = tokio::spawn(async move { refresher.try_refresh(subject.as_ref()).await });
        let joined = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(RequestError::Cancelled),
                    joined = task => joined,
                }
            }
            None => task.await,
        };
        Ok(match joined {
            Ok(refreshed) => refreshed,
            Err(error) => {
                tracing::warn!(error = %error, "Token refresh task failed");
                false
            }
        })
    }

    async fn send_once(
        &self,
        request: &PreparedRequest,
        bearer: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<reqwest::Response, RequestError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.as_str())
            .headers(request.headers_with_bearer(bearer)?)
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout);
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder.body(bytes.clone()),
            RequestBody::Multipart(upload) => builder.multipart(upload.to_form()?),
        };

        let send = builder.send();
        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(RequestError::Cancelled),
                    result = send => result,
                }
            }
            None => send.await,
        };
        result.map_err(|error| RequestError::Transport {
            message: error.to_string(),
        })
    }
}

pub fn build_url(
    base_url: &str,
    path: &str,
    query: &[(String, Option<String>)],
) -> Result<String, RequestError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(RequestError::InvalidPath);
    }
    let url = if trimmed.starts_with("http") {
        trimmed.to_string()
    } else if trimmed.starts_with('/') {
        format!("{base_url}{trimmed}")
    } else {
        format!("{base_url}/{trimmed}")
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut appended = false;
    for (key, value) in query {
        if let Some(value) = value {
            serializer.append_pair(key, value);
            appended = true;
        }
    }
    if !appended {
        return Ok(url);
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    Ok(format!("{url}{separator}{}", serializer.finish()))
}

/// Decodes a resolved body into a typed response.
pub fn decode<T>(value: Value) -> Result<T, RequestError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(value).map_err(|error| RequestError::Decode {
        message: error.to_string(),
    })
}

pub(crate) async fn resolve_response(response: reqwest::Response) -> Result<Value, RequestError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| RequestError::Transport {
            message: error.to_string(),
        })?;
    let body = parse_body(&bytes);

    if status.is_success() {
        return Ok(body.unwrap_or(Value::Null));
    }
    Err(format_api_error(status, body).into())
}

pub fn format_api_error(status: StatusCode, body: Option<Value>) -> ApiError {
    let message = body
        .as_ref()
        .and_then(|body| body.get("message"))
        .and_then(message_text)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
    ApiError::new(status.as_u16(), message, body)
}

pub(crate) fn parse_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Null | Value::String(_) | Value::Bool(false) => None,
        Value::Number(number) if number.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}
