use mocka_client_core::{MockLifetime, RefreshTokenUpdate, SubjectId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::client::{MockaClient, RequestError, decode};
use crate::request::{MultipartUpload, RequestOptions};

pub const AUTH_REGISTER_PATH: &str = "/api/auth/register";
pub const AUTH_LOGIN_PATH: &str = "/api/auth/login";
pub const AUTH_REFRESH_PATH: &str = "/api/auth/refresh";
pub const DOC_PATH: &str = "/api/doc";
pub const MOCK_PATH: &str = "/api/mock";

/// Multipart field name the document endpoint reads the spec file from.
pub const DOC_FILE_FIELD: &str = "DocFile";
pub const MOCK_SAMPLE_QUERY: &str = "/?statusCode=200";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoginRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Body of the refresh exchange. The subject hint goes out under both keys
/// the backend has been seen to read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<SubjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nameid: Option<SubjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthTokens {
    #[serde(rename = "accessToken", default)]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "FullName", default)]
    full_name_pascal: Option<String>,
    #[serde(rename = "fullName", default)]
    full_name_camel: Option<String>,
    #[serde(rename = "full_name", default)]
    full_name_snake: Option<String>,
}

impl AuthTokens {
    /// First non-empty display name, checked as `FullName`, `fullName`,
    /// then `full_name`.
    #[must_use]
    pub fn full_name(&self) -> Option<&str> {
        [
            &self.full_name_pascal,
            &self.full_name_camel,
            &self.full_name_snake,
        ]
        .into_iter()
        .filter_map(|name| name.as_deref())
        .find(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DocUploadResponse {
    #[serde(rename = "docId", default, deserialize_with = "lenient_id")]
    pub doc_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MockRequest {
    #[serde(rename = "docId")]
    pub doc_id: i64,
    #[serde(flatten)]
    pub lifetime: MockLifetime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MockGenerated {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "ExpiryDate", default)]
    expiry_pascal: Option<String>,
    #[serde(rename = "expiryDate", default)]
    expiry_camel: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

impl MockGenerated {
    #[must_use]
    pub fn expiry(&self) -> Option<&str> {
        [&self.expiry_pascal, &self.expiry_camel, &self.expiry]
            .into_iter()
            .filter_map(|value| value.as_deref())
            .find(|value| !value.is_empty())
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Best-effort content type for an uploaded spec file.
#[must_use]
pub fn guess_spec_mime(file_name: &str) -> Option<&'static str> {
    let extension = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "json" => Some("application/json"),
        "yaml" | "yml" => Some("application/yaml"),
        _ => None,
    }
}

#[must_use]
pub fn mock_url(base_url: &str, token: &str) -> String {
    format!("{}/{token}", base_url.trim_end_matches('/'))
}

#[must_use]
pub fn mock_sample_url(base_url: &str, token: &str) -> String {
    format!("{}{MOCK_SAMPLE_QUERY}", mock_url(base_url, token))
}

impl MockaClient {
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthTokens, RequestError> {
        let value = self
            .post(AUTH_REGISTER_PATH, request, RequestOptions::new())
            .await?;
        decode(value)
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthTokens, RequestError> {
        let value = self
            .post(AUTH_LOGIN_PATH, request, RequestOptions::new())
            .await?;
        decode(value)
    }

    /// Logs in and persists the returned tokens.
    pub async fn sign_in(&self, request: &LoginRequest) -> Result<AuthTokens, RequestError> {
        let tokens = self.login(request).await?;
        self.persist_sign_in(&tokens)?;
        Ok(tokens)
    }

    /// Registers and persists the returned tokens.
    pub async fn sign_up(&self, request: &RegisterRequest) -> Result<AuthTokens, RequestError> {
        let tokens = self.register(request).await?;
        self.persist_sign_in(&tokens)?;
        Ok(tokens)
    }

    fn persist_sign_in(&self, tokens: &AuthTokens) -> Result<(), RequestError> {
        let store = self.tokens();
        store.set_tokens(
            tokens.access_token.as_deref(),
            RefreshTokenUpdate::Replace(tokens.refresh_token.as_deref()),
        )?;
        // An absent name leaves whatever was stored before.
        if let Some(name) = tokens.full_name() {
            store.set_full_name(Some(name))?;
        }
        Ok(())
    }

    pub async fn upload_doc(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocUploadResponse, RequestError> {
        let upload =
            MultipartUpload::new().file(DOC_FILE_FIELD, file_name, guess_spec_mime(file_name), bytes);
        let value = self.upload(DOC_PATH, upload, RequestOptions::new()).await?;
        decode(value)
    }

    pub async fn generate_mock(&self, request: &MockRequest) -> Result<MockGenerated, RequestError> {
        let value = self.post(MOCK_PATH, request, RequestOptions::new()).await?;
        decode(value)
    }

    #[must_use]
    pub fn mock_url(&self, token: &str) -> String {
        mock_url(self.base_url(), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocka_client_core::LifetimeUnit;
    use serde_json::json;

    #[test]
    fn full_name_follows_key_priority() {
        let tokens: AuthTokens = serde_json::from_value(json!({
            "accessToken": "a",
            "full_name": "snake",
            "fullName": "camel",
        }))
        .expect("tokens");
        assert_eq!(tokens.full_name(), Some("camel"));

        let tokens: AuthTokens =
            serde_json::from_value(json!({"FullName": "", "full_name": "snake"})).expect("tokens");
        assert_eq!(tokens.full_name(), Some("snake"));
        assert_eq!(AuthTokens::default().full_name(), None);
    }

    #[test]
    fn doc_id_accepts_numbers_and_numeric_strings() {
        let numeric: DocUploadResponse =
            serde_json::from_value(json!({"docId": 42})).expect("doc");
        assert_eq!(numeric.doc_id, Some(42));
        let text: DocUploadResponse =
            serde_json::from_value(json!({"docId": " 7 "})).expect("doc");
        assert_eq!(text.doc_id, Some(7));
        let missing: DocUploadResponse = serde_json::from_value(json!({})).expect("doc");
        assert_eq!(missing.doc_id, None);
        let garbage: DocUploadResponse =
            serde_json::from_value(json!({"docId": "abc"})).expect("doc");
        assert_eq!(garbage.doc_id, None);
    }

    #[test]
    fn mock_request_carries_one_lifetime_key() {
        let request = MockRequest {
            doc_id: 9,
            lifetime: MockLifetime::new(LifetimeUnit::Hours, 6).expect("lifetime"),
        };
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            json!({"docId": 9, "ltHours": 6})
        );
    }

    #[test]
    fn expiry_aliases_are_checked_in_order() {
        let generated: MockGenerated = serde_json::from_value(json!({
            "token": "abc",
            "expiry": "c",
            "expiryDate": "b",
        }))
        .expect("generated");
        assert_eq!(generated.expiry(), Some("b"));
        let generated: MockGenerated =
            serde_json::from_value(json!({"ExpiryDate": "a", "expiry": "c"})).expect("generated");
        assert_eq!(generated.expiry(), Some("a"));
        assert_eq!(MockGenerated::default().expiry(), None);
    }

    #[test]
    fn refresh_request_omits_missing_subject() {
        let bare = RefreshRequest {
            refresh_token: "r".to_string(),
            user_id: None,
            nameid: None,
        };
        assert_eq!(
            serde_json::to_value(&bare).expect("serialize"),
            json!({"refreshToken": "r"})
        );
        let subject = SubjectId::Number(serde_json::Number::from(17));
        let hinted = RefreshRequest {
            refresh_token: "r".to_string(),
            user_id: Some(subject.clone()),
            nameid: Some(subject),
        };
        assert_eq!(
            serde_json::to_value(&hinted).expect("serialize"),
            json!({"refreshToken": "r", "userId": 17, "nameid": 17})
        );
    }

    #[test]
    fn mock_urls_join_base_and_token() {
        assert_eq!(mock_url("https://api.mocka.dev/", "tok"), "https://api.mocka.dev/tok");
        assert_eq!(
            mock_sample_url("https://api.mocka.dev", "tok"),
            "https://api.mocka.dev/tok/?statusCode=200"
        );
    }

    #[test]
    fn spec_mime_is_guessed_from_extension() {
        assert_eq!(guess_spec_mime("petstore.JSON"), Some("application/json"));
        assert_eq!(guess_spec_mime("api.yml"), Some("application/yaml"));
        assert_eq!(guess_spec_mime("notes.txt"), None);
        assert_eq!(guess_spec_mime("noext"), None);
    }
}
