//! Message rewriting applied before layout.
//!
//! The JSON formatter tidies structured log lines: it drops noisy keys,
//! flattens embedded newlines and optionally sorts keys. Anything that is not
//! a JSON object is printed as it arrived.

use std::borrow::Cow;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatterError {
    #[error("unknown formatter '{0}' (expected json_formatter or raw)")]
    UnknownFormatter(String),

    #[error("invalid key_value_pairs entry '{0}': expected key:value")]
    InvalidPair(String),

    #[error("unknown format option '{0}' (expected remove_keys, key_value_pairs or sort)")]
    UnknownOption(String),

    #[error("invalid value '{0}' for sort: expected true or false")]
    InvalidSort(String),
}

/// Options for [`MessageFormatter::Json`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonFormatOptions {
    /// Top-level keys removed from every message
    pub remove_keys: Vec<String>,
    /// Top-level `key` removed when its value equals `value`
    pub drop_pairs: Vec<(String, String)>,
    /// Sort object keys at every level
    pub sort: bool,
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|v| !v.is_empty())
}

fn parse_pair(pair: &str) -> Result<(String, String), FormatterError> {
    match pair.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(FormatterError::InvalidPair(pair.to_string())),
    }
}

fn parse_bool(value: &str) -> Result<bool, FormatterError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(FormatterError::InvalidSort(value.to_string())),
    }
}

impl JsonFormatOptions {
    /// Build options from config-file lists; each pair is `key:value`
    pub fn new(
        remove_keys: &[String],
        key_value_pairs: &[String],
        sort: bool,
    ) -> Result<Self, FormatterError> {
        Ok(Self {
            remove_keys: remove_keys
                .iter()
                .flat_map(|k| split_list(k))
                .map(str::to_string)
                .collect(),
            drop_pairs: key_value_pairs
                .iter()
                .flat_map(|p| split_list(p))
                .map(parse_pair)
                .collect::<Result<_, _>>()?,
            sort,
        })
    }

    /// Parse `remove_keys=a,b&key_value_pairs=level:info&sort=true`
    pub fn parse_query(query: &str) -> Result<Self, FormatterError> {
        let mut options = Self::default();
        for entry in query.trim().split('&').map(str::trim) {
            let Some((key, value)) = entry.split_once('=') else {
                if entry.is_empty() {
                    continue;
                }
                return Err(FormatterError::UnknownOption(entry.to_string()));
            };
            match key.trim() {
                "remove_keys" => options
                    .remove_keys
                    .extend(split_list(value).map(str::to_string)),
                "key_value_pairs" => {
                    for pair in split_list(value) {
                        options.drop_pairs.push(parse_pair(pair)?);
                    }
                }
                "sort" => options.sort = parse_bool(value)?,
                other => return Err(FormatterError::UnknownOption(other.to_string())),
            }
        }
        Ok(options)
    }

    fn matches_pair(value: &Value, expected: &str) -> bool {
        match value {
            Value::String(s) => s == expected,
            Value::Object(_) | Value::Array(_) => false,
            scalar => scalar.to_string() == expected,
        }
    }

    fn format(&self, mut object: Map<String, Value>) -> Value {
        object.retain(|key, value| {
            !self.remove_keys.iter().any(|k| k == key)
                && !self
                    .drop_pairs
                    .iter()
                    .any(|(k, v)| k == key && Self::matches_pair(value, v))
        });
        let mut value = Value::Object(object);
        clean(&mut value, self.sort);
        value
    }
}

/// Trim strings, replace embedded newlines and optionally sort keys, recursively
fn clean(value: &mut Value, sort: bool) {
    match value {
        Value::String(s) => {
            let flattened = s.trim().replace('\n', " ");
            *s = flattened;
        }
        Value::Array(items) => items.iter_mut().for_each(|item| clean(item, sort)),
        Value::Object(map) => {
            map.values_mut().for_each(|item| clean(item, sort));
            if sort {
                map.sort_keys();
            }
        }
        _ => {}
    }
}

/// How message payloads are rewritten before display
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageFormatter {
    /// Print messages as received
    #[default]
    Raw,
    Json(JsonFormatOptions),
}

impl MessageFormatter {
    pub fn from_name(name: &str, options: JsonFormatOptions) -> Result<Self, FormatterError> {
        match name.trim().to_lowercase().as_str() {
            "json_formatter" | "json" => Ok(Self::Json(options)),
            "raw" | "none" | "" => Ok(Self::Raw),
            other => Err(FormatterError::UnknownFormatter(other.to_string())),
        }
    }

    pub fn apply<'a>(&self, message: &'a str) -> Cow<'a, str> {
        let Self::Json(options) = self else {
            return Cow::Borrowed(message);
        };
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(message.trim()) else {
            return Cow::Borrowed(message);
        };
        match serde_json::to_string(&options.format(object)) {
            Ok(formatted) => Cow::Owned(formatted),
            Err(_) => Cow::Borrowed(message),
        }
    }
}
