//! Unverified access-token payload decoding.
//!
//! Nothing here checks a signature. The claims are only used to time a
//! proactive refresh and to hint the subject to the refresh endpoint.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;
use serde_json::Value;

const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claim names that may carry the user id, highest priority first.
pub const SUBJECT_CLAIMS: [&str; 3] = ["nameid", "userId", "sub"];

/// Structural view over a decoded payload segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClaims {
    payload: Value,
}

/// Subject identifier as it appeared in the token, forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubjectId {
    Text(String),
    Number(serde_json::Number),
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Number(value) => write!(f, "{value}"),
        }
    }
}

impl DecodedClaims {
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Expiry in epoch seconds. Numeric strings are accepted.
    #[must_use]
    pub fn exp(&self) -> Option<i64> {
        match self.payload.get("exp")? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64)),
            Value::String(raw) => raw.trim().parse::<f64>().ok().map(|value| value as i64),
            _ => None,
        }
        .filter(|exp| *exp != 0)
    }

    /// First usable subject claim in [`SUBJECT_CLAIMS`] order.
    #[must_use]
    pub fn subject(&self) -> Option<SubjectId> {
        SUBJECT_CLAIMS
            .iter()
            .find_map(|claim| match self.payload.get(*claim)? {
                Value::String(value) if !value.is_empty() => Some(SubjectId::Text(value.clone())),
                Value::Number(value) if value.as_f64() != Some(0.0) => {
                    Some(SubjectId::Number(value.clone()))
                }
                _ => None,
            })
    }
}

/// Decodes the middle segment of a compact token. Returns `None` when there
/// are fewer than two segments or the segment is not base64url JSON.
#[must_use]
pub fn decode_claims(token: &str) -> Option<DecodedClaims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;

    // Tolerate the standard alphabet as well.
    let normalized = payload.replace('+', "-").replace('/', "_");
    let bytes = PAYLOAD_ENGINE.decode(normalized.as_bytes()).ok()?;
    let payload = serde_json::from_slice::<Value>(&bytes).ok()?;
    Some(DecodedClaims { payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use serde_json::json;

    fn token_with(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn decodes_exp_and_subject() {
        let claims = decode_claims(&token_with(&json!({"exp": 1_900_000_000, "sub": "42"})))
            .expect("claims");
        assert_eq!(claims.exp(), Some(1_900_000_000));
        assert_eq!(claims.subject(), Some(SubjectId::Text("42".to_string())));
    }

    #[test]
    fn subject_prefers_nameid_then_user_id_then_sub() {
        let claims = decode_claims(&token_with(&json!({
            "sub": "sub-id",
            "userId": 7,
            "nameid": "name-id"
        })))
        .expect("claims");
        assert_eq!(claims.subject(), Some(SubjectId::Text("name-id".to_string())));

        let claims =
            decode_claims(&token_with(&json!({"sub": "sub-id", "userId": 7}))).expect("claims");
        assert_eq!(claims.subject(), Some(SubjectId::Number(7.into())));

        let claims = decode_claims(&token_with(&json!({"nameid": "", "sub": "sub-id"})))
            .expect("claims");
        assert_eq!(claims.subject(), Some(SubjectId::Text("sub-id".to_string())));
    }

    #[test]
    fn two_segments_are_enough() {
        let body = URL_SAFE_NO_PAD.encode(br#"{"exp":5}"#);
        let claims = decode_claims(&format!("header.{body}")).expect("claims");
        assert_eq!(claims.exp(), Some(5));
    }

    #[test]
    fn padded_and_standard_alphabet_payloads_decode() {
        // `?>` encodes to characters outside the url-safe alphabet.
        let raw = br#"{"note":"?>?>","exp":9}"#;
        let padded = STANDARD.encode(raw);
        assert!(padded.contains('+') || padded.contains('/') || padded.ends_with('='));
        let claims = decode_claims(&format!("h.{padded}.s")).expect("claims");
        assert_eq!(claims.exp(), Some(9));
    }

    #[test]
    fn numeric_string_exp_is_accepted() {
        let claims = decode_claims(&token_with(&json!({"exp": "1700000000"}))).expect("claims");
        assert_eq!(claims.exp(), Some(1_700_000_000));
    }

    #[test]
    fn malformed_tokens_decode_to_none() {
        assert!(decode_claims("").is_none());
        assert!(decode_claims("single-segment").is_none());
        assert!(decode_claims("header.!!!not-base64!!!.sig").is_none());
        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(decode_claims(&format!("header.{not_json}.sig")).is_none());
    }

    #[test]
    fn any_json_payload_is_structurally_valid() {
        let scalar = URL_SAFE_NO_PAD.encode(b"12");
        let claims = decode_claims(&format!("h.{scalar}")).expect("claims");
        assert_eq!(claims.exp(), None);
        assert_eq!(claims.subject(), None);
    }
}
