//! Normalization of heterogeneous 422 payloads into renderable messages.
//!
//! Backends disagree on where validation messages live and how they are
//! shaped. Every candidate location is classified into a [`PayloadShape`]
//! and the shapes are consumed in a fixed priority order. Nothing in here
//! fails: an unexpected payload degrades to an empty result.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

pub const GLOBAL_FIELD_KEY: &str = "_global";

const VALIDATION_STATUS: u64 = 422;

/// Object keys that may name the offending field, highest priority first.
const FIELD_NAME_KEYS: [&str; 5] = ["field", "name", "key", "keyName", "param"];

/// Field key -> messages in arrival order. `_global` holds messages that
/// could not be attributed to a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages for a field; the lookup key is normalized the same way as
    /// stored keys.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        let key = if field == GLOBAL_FIELD_KEY {
            field.to_string()
        } else {
            normalize_field_key(field)
        };
        self.fields.get(&key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn first(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(|messages| messages.first())
            .map(String::as_str)
    }

    #[must_use]
    pub fn global(&self) -> Option<&[String]> {
        self.fields.get(GLOBAL_FIELD_KEY).map(Vec::as_slice)
    }

    /// Drops a field's hints, e.g. once the user edits that input.
    pub fn clear_field(&mut self, field: &str) -> Option<Vec<String>> {
        self.fields.remove(&normalize_field_key(field))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|(key, messages)| (key.as_str(), messages.as_slice()))
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.fields
    }

    fn push(&mut self, key: &str, message: impl Into<String>) {
        let key = key
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        self.fields.entry(key).or_default().push(message.into());
    }

    fn push_global(&mut self, message: impl Into<String>) {
        self.fields
            .entry(GLOBAL_FIELD_KEY.to_string())
            .or_default()
            .push(message.into());
    }
}

/// Lower-cased field name with every non-alphanumeric character removed.
#[must_use]
pub fn normalize_field_key(field: &str) -> String {
    field
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// The payload shapes the normalizer recognizes.
#[derive(Debug)]
enum PayloadShape<'a> {
    /// Non-empty sequence made only of strings.
    Strings(Vec<&'a str>),
    /// Non-empty sequence of strings and non-null objects.
    Records(&'a [Value]),
    /// Any other sequence.
    MixedSequence(&'a [Value]),
    /// Field name -> message(s).
    FieldMap(&'a Map<String, Value>),
    Unrecognized,
}

impl<'a> PayloadShape<'a> {
    fn classify(value: Option<&'a Value>) -> Self {
        match value {
            Some(Value::Array(items)) if items.is_empty() => Self::MixedSequence(items),
            Some(Value::Array(items)) => {
                let strings = items.iter().map(Value::as_str).collect::<Option<Vec<_>>>();
                if let Some(strings) = strings {
                    return Self::Strings(strings);
                }
                if items.iter().all(|item| {
                    matches!(item, Value::String(_) | Value::Object(_) | Value::Array(_))
                }) {
                    Self::Records(items)
                } else {
                    Self::MixedSequence(items)
                }
            }
            Some(Value::Object(map)) => Self::FieldMap(map),
            _ => Self::Unrecognized,
        }
    }
}

/// Flat list of validation messages, or `None` when the error is not a 422
/// or no candidate location holds any message.
#[must_use]
pub fn extract_validation_messages(err: &Value) -> Option<Vec<String>> {
    if err.get("status").and_then(Value::as_u64) != Some(VALIDATION_STATUS) {
        return None;
    }

    let details = err.get("details");
    let candidates = [
        details,
        details.and_then(|details| details.get("details")),
        details.and_then(|details| details.get("errors")),
        err.get("errors"),
        err.get("messages"),
        err.get("detail"),
    ];

    candidates
        .into_iter()
        .map(|candidate| flatten_messages(PayloadShape::classify(candidate)))
        .find(|messages| !messages.is_empty())
}

fn flatten_messages(shape: PayloadShape<'_>) -> Vec<String> {
    match shape {
        PayloadShape::Strings(strings) => strings.into_iter().map(str::to_string).collect(),
        PayloadShape::Records(items) | PayloadShape::MixedSequence(items) => {
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::String(message) => out.push(message.clone()),
                    Value::Object(_) => {
                        if let Some(message) = item.get("message").and_then(Value::as_str) {
                            out.push(message.to_string());
                        } else if let Some(messages) =
                            item.get("messages").and_then(Value::as_array)
                        {
                            out.extend(string_items(messages));
                        }
                    }
                    _ => {}
                }
            }
            out
        }
        PayloadShape::FieldMap(map) => {
            let mut out = Vec::new();
            for value in map.values() {
                match value {
                    Value::Array(messages) => out.extend(string_items(messages)),
                    Value::String(message) => out.push(message.clone()),
                    _ => {}
                }
            }
            out
        }
        PayloadShape::Unrecognized => Vec::new(),
    }
}

/// Routes validation messages to normalized field keys.
///
/// Candidate sequences are tried in order (`details`, `details.details`,
/// `details.errors`, `errors`, `messages`, `detail`, then the primary
/// payload); the first one shaped as strings or records wins. Failing that,
/// a primary payload that is itself a field map is walked entry by entry.
#[must_use]
pub fn map_validation_errors(err: &Value) -> FieldErrors {
    let mut out = FieldErrors::new();

    let details = err.get("details");
    let payload = [details, err.get("errors"), err.get("messages")]
        .into_iter()
        .flatten()
        .find(|value| is_truthy(value))
        .unwrap_or(err);
    if !is_truthy(payload) {
        return out;
    }

    let candidates = [
        details,
        details.and_then(|details| details.get("details")),
        details.and_then(|details| details.get("errors")),
        err.get("errors"),
        err.get("messages"),
        err.get("detail"),
        Some(payload),
    ];

    for candidate in candidates {
        match PayloadShape::classify(candidate) {
            PayloadShape::Strings(strings) => {
                for message in strings {
                    route_message(&mut out, message);
                }
                return out;
            }
            PayloadShape::Records(items) => {
                for item in items {
                    absorb_record(&mut out, item);
                }
                return out;
            }
            _ => {}
        }
    }

    match payload {
        Value::Object(map) => {
            for (field, value) in map {
                absorb_field_entry(&mut out, field, value);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                absorb_field_entry(&mut out, &index.to_string(), value);
            }
        }
        _ => {}
    }
    out
}

/// `"<field>: <message>"` goes to the field, anything else to `_global`.
fn route_message(out: &mut FieldErrors, message: &str) {
    match message.split_once(':') {
        Some((field, rest)) if !field.is_empty() => {
            out.push(&normalize_field_key(field), rest.trim());
        }
        _ => out.push_global(message),
    }
}

fn absorb_record(out: &mut FieldErrors, item: &Value) {
    let record = match item {
        Value::String(message) => {
            if !message.is_empty() {
                route_message(out, message);
            }
            return;
        }
        Value::Object(_) | Value::Array(_) => item,
        _ => return,
    };

    let field = FIELD_NAME_KEYS
        .iter()
        .find_map(|key| record.get(*key).filter(|value| is_truthy(value)));
    let message = record.get("message").filter(|value| is_truthy(value));
    let messages = record.get("messages").and_then(Value::as_array);

    match (field, message, messages) {
        (Some(field), Some(message), _) => {
            out.push(&normalize_field_key(&display(field)), display(message));
        }
        (Some(field), None, Some(messages)) => {
            let key = normalize_field_key(&display(field));
            for message in string_items(messages) {
                out.push(&key, message);
            }
        }
        (None, _, Some(messages)) => {
            for message in string_items(messages) {
                route_message(out, &message);
            }
        }
        _ => {
            if let Some(details) = record.get("details").and_then(Value::as_array) {
                for message in string_items(details) {
                    route_message(out, &message);
                }
            }
        }
    }
}

fn absorb_field_entry(out: &mut FieldErrors, field: &str, value: &Value) {
    let key = normalize_field_key(field);
    match value {
        Value::Array(messages) => {
            for message in string_items(messages) {
                out.push(&key, message);
            }
        }
        Value::String(message) => out.push(&key, message.clone()),
        Value::Object(_) => {
            let nested = value
                .get("messages")
                .and_then(Value::as_array)
                .or_else(|| value.get("details").and_then(Value::as_array));
            if let Some(messages) = nested {
                for message in string_items(messages) {
                    out.push(&key, message);
                }
            }
        }
        _ => {}
    }
}

fn string_items(values: &[Value]) -> impl Iterator<Item = String> + '_ {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
