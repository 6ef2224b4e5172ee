use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000";
pub const ENV_API_BASE_URL: &str = "MOCKA_API_BASE_URL";
pub const ENV_API_BASE_URL_LEGACY: &str = "VITE_API_BASE_URL";
pub const ENV_TOKEN_FILE: &str = "MOCKA_TOKEN_FILE";
pub const BASE_URL_SOURCE_DEFAULT_LOCAL: &str = "default_local";

const TOKEN_FILE_NAME: &str = "session.v1.json";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
}

// Checked in order; the first non-blank value wins.
const BASE_URL_ENV_VARS: [&str; 2] = [ENV_API_BASE_URL, ENV_API_BASE_URL_LEGACY];

/// Picks the API base url from the environment and reports where it came
/// from, falling back to the local development server.
pub fn resolve_api_base_url() -> Result<(String, &'static str), ConfigError> {
    let (raw, source) = BASE_URL_ENV_VARS
        .iter()
        .find_map(|key| env_non_empty(key).map(|value| (value, *key)))
        .unwrap_or_else(|| (DEFAULT_API_BASE_URL.to_string(), BASE_URL_SOURCE_DEFAULT_LOCAL));
    Ok((normalize_base_url(&raw)?, source))
}

/// Trims whitespace and trailing slashes, then requires an http(s) scheme
/// followed by a host.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }
    let after_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or(ConfigError::InvalidBaseUrl)?;
    let host = after_scheme.split('/').next().unwrap_or_default();
    if host.trim().is_empty() {
        return Err(ConfigError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

/// Location of the persisted session document: the override variable, else
/// the platform data dir, else a dot-dir under home.
#[must_use]
pub fn resolve_token_file_path() -> PathBuf {
    env_non_empty(ENV_TOKEN_FILE)
        .map(PathBuf::from)
        .or_else(|| dirs::data_local_dir().map(|dir| dir.join("mocka").join(TOKEN_FILE_NAME)))
        .or_else(|| dirs::home_dir().map(|dir| dir.join(".mocka").join(TOKEN_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(TOKEN_FILE_NAME))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
