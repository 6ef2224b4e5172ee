use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::validation::{FieldErrors, extract_validation_messages, map_validation_errors};

pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_UNPROCESSABLE_ENTITY: u16 = 422;

/// Uniform failure shape for a non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            status,
            message: message.into(),
            details,
        }
    }

    #[must_use]
    pub fn is_validation_failure(&self) -> bool {
        self.status == STATUS_UNPROCESSABLE_ENTITY
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    /// The error as the loosely-shaped object the normalizer walks.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "status": self.status,
            "message": self.message,
            "details": self.details.clone().unwrap_or(Value::Null),
        })
    }

    #[must_use]
    pub fn validation_messages(&self) -> Option<Vec<String>> {
        extract_validation_messages(&self.to_value())
    }

    #[must_use]
    pub fn field_errors(&self) -> FieldErrors {
        map_validation_errors(&self.to_value())
    }
}
