//! HTTP layer for the Mocka API.
//!
//! Attaches the stored bearer to every call, recovers a 401 on protected
//! endpoints with a single refresh-and-retry, and turns every non-2xx
//! response into an [`mocka_client_core::ApiError`].

pub mod client;
pub mod endpoints;
pub mod refresh;
pub mod request;

pub use client::{
    ClientConfig, DEFAULT_TIMEOUT_MS, MockaClient, RequestError, build_url, decode,
    format_api_error,
};
pub use endpoints::{
    AUTH_LOGIN_PATH, AUTH_REFRESH_PATH, AUTH_REGISTER_PATH, AuthTokens, DOC_FILE_FIELD, DOC_PATH,
    DocUploadResponse, LoginRequest, MOCK_PATH, MockGenerated, MockRequest, RefreshRequest,
    RegisterRequest, guess_spec_mime, mock_sample_url, mock_url,
};
pub use refresh::RefreshCoordinator;
pub use request::{MultipartUpload, PROTECTED_PATH_PREFIXES, RequestOptions, is_refresh_eligible};
pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;
