//! # Raw Observation Intake
//!
//! Requests arrive as loosely-typed key/value mappings: a JSON object whose
//! values may be numbers or strings, a URL-encoded form where every value is a
//! string, or a row of a delimited file. This module normalises all three into
//! a single `RawObservation` so that exactly one validation path
//! (`encoding::PatientObservation::from_raw`) sees every request, whatever the
//! transport.
//!
//! Nothing here interprets field values. Type checks, category lookups and
//! range checks belong to the encoding step.

use crate::encoding::ValidationError;
use serde_json::Value;
use std::collections::HashMap;

/// A single untyped input value as it arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// A JSON number.
    Number(f64),
    /// A JSON string, a form field or a delimited-file cell.
    Text(String),
    /// Any other JSON value (null, boolean, array, object). Carries the JSON
    /// type name for error messages.
    Other(&'static str),
}

impl RawValue {
    /// Human-readable name of the value's type, used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Number(_) => "number",
            RawValue::Text(_) => "string",
            RawValue::Other(kind) => kind,
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            // as_f64 only fails for arbitrary-precision numbers, which we never enable.
            Value::Number(n) => n
                .as_f64()
                .map(RawValue::Number)
                .unwrap_or(RawValue::Other("number")),
            Value::String(s) => RawValue::Text(s),
            Value::Null => RawValue::Other("null"),
            Value::Bool(_) => RawValue::Other("boolean"),
            Value::Array(_) => RawValue::Other("array"),
            Value::Object(_) => RawValue::Other("object"),
        }
    }
}

/// The named raw fields of one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawObservation {
    fields: HashMap<String, RawValue>,
}

impl RawObservation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for tests and for the CLI.
    pub fn with(mut self, key: impl Into<String>, value: RawValue) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder-style insert of a text value.
    pub fn with_text(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, RawValue::Text(value.into()))
    }

    /// Builder-style insert of a numeric value.
    pub fn with_number(self, key: impl Into<String>, value: f64) -> Self {
        self.with(key, RawValue::Number(value))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: RawValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the value stored under the first alias that is present.
    ///
    /// Aliases are tried in order, so when a client sends both `qrs` and
    /// `qrsDuration` the earlier alias in the list wins.
    pub fn lookup(&self, aliases: &[&str]) -> Option<&RawValue> {
        aliases.iter().find_map(|alias| self.fields.get(*alias))
    }

    /// Decodes a JSON document. The body must be a JSON object.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::MalformedBody(format!("invalid JSON: {e}")))?;
        Self::from_json_value(value)
    }

    /// Converts an already-parsed JSON value.
    pub fn from_json_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self {
                fields: map
                    .into_iter()
                    .map(|(k, v)| (k, RawValue::from_json(v)))
                    .collect(),
            }),
            other => Err(ValidationError::MalformedBody(format!(
                "expected a JSON object, found {}",
                RawValue::from_json(other).type_name()
            ))),
        }
    }

    /// Decodes an `application/x-www-form-urlencoded` body.
    pub fn from_form_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes)
            .map_err(|e| ValidationError::MalformedBody(format!("invalid form encoding: {e}")))?;
        Ok(Self::from_text_pairs(pairs))
    }

    /// Builds an observation where every value is text. Later duplicates of a
    /// key replace earlier ones, matching how form frameworks read single values.
    pub fn from_text_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut observation = Self::new();
        for (key, value) in pairs {
            observation.insert(key, RawValue::Text(value.into()));
        }
        observation
    }
}
