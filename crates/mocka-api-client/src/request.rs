use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;

use crate::client::RequestError;
use crate::endpoints::{AUTH_REFRESH_PATH, DOC_PATH, MOCK_PATH};

/// Path prefixes eligible for refresh-and-retry on a 401.
pub const PROTECTED_PATH_PREFIXES: [&str; 3] = [DOC_PATH, MOCK_PATH, AUTH_REFRESH_PATH];

/// Per-call extras: headers, query parameters and a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, Option<String>)>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), Some(value.to_string())));
        self
    }

    /// `None` values are kept in order but never serialized.
    pub fn query_opt<V: ToString>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.query
            .push((key.into(), value.map(|value| value.to_string())));
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// One file field of a multipart upload.
#[derive(Debug, Clone)]
pub(crate) struct UploadPart {
    name: String,
    file_name: Option<String>,
    mime: Option<String>,
    bytes: Vec<u8>,
}

/// Multipart body kept as plain data so each attempt can rebuild its form
/// with a fresh boundary.
#[derive(Debug, Clone, Default)]
pub struct MultipartUpload {
    parts: Vec<UploadPart>,
}

impl MultipartUpload {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(UploadPart {
            name: name.into(),
            file_name: Some(file_name.into()),
            mime: mime.map(str::to_string),
            bytes,
        });
        self
    }

    pub(crate) fn to_form(&self) -> Result<Form, RequestError> {
        let mut form = Form::new();
        for part in &self.parts {
            let mut body = Part::bytes(part.bytes.clone());
            if let Some(file_name) = &part.file_name {
                body = body.file_name(file_name.clone());
            }
            if let Some(mime) = &part.mime {
                body = body.mime_str(mime).map_err(|error| RequestError::Encode {
                    message: error.to_string(),
                })?;
            }
            form = form.part(part.name.clone(), body);
        }
        Ok(form)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RequestBody {
    Empty,
    Json(Vec<u8>),
    Multipart(MultipartUpload),
}

/// Immutable description of a call. Both attempts are issued from the same
/// descriptor; only the bearer differs.
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
}

impl PreparedRequest {
    pub(crate) fn new(
        method: Method,
        path: &str,
        url: String,
        extra_headers: &[(String, String)],
        body: RequestBody,
    ) -> Result<Self, RequestError> {
        let mut headers = HeaderMap::new();
        // Multipart requests leave Content-Type to the form so the boundary
        // survives.
        if !matches!(body, RequestBody::Multipart(_)) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
                RequestError::Encode {
                    message: format!("invalid header name {name}: {error}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|error| RequestError::Encode {
                message: format!("invalid header value for {name}: {error}"),
            })?;
            headers.insert(name, value);
        }
        Ok(Self {
            method,
            path: path.to_string(),
            url,
            headers,
            body,
        })
    }

    pub(crate) fn headers_with_bearer(&self, bearer: Option<&str>) -> Result<HeaderMap, RequestError> {
        let mut headers = self.headers.clone();
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|error| {
                RequestError::Encode {
                    message: format!("invalid bearer token: {error}"),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    pub(crate) fn refresh_eligible(&self) -> bool {
        is_refresh_eligible(&self.path, &self.url)
    }
}

/// A 401 on `path` may be recovered by refreshing, unless the call is the
/// refresh exchange itself.
#[must_use]
pub fn is_refresh_eligible(path: &str, url: &str) -> bool {
    let protected = PROTECTED_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix) || url.contains(prefix));
    protected && !path.contains(AUTH_REFRESH_PATH)
}
