//! Caller-supplied parameters and optional per-template schemas.
//!
//! A [`ParameterSet`] maps variable names to raw JSON values. The pipeline
//! never mutates it; validation produces a separate text map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Mapping from variable name to raw caller-supplied value.
///
/// Keys are kept sorted so the JSON serialization is canonical, which the
/// cache relies on for fingerprints.
///
/// # Example
///
/// ```
/// use prompt_assembler::params::ParameterSet;
///
/// let params = ParameterSet::new().with("name", "World").with("count", 3);
/// assert_eq!(params.len(), 2);
/// assert_eq!(params.canonical_json(), r#"{"count":3,"name":"World"}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, Value>);

impl ParameterSet {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Get a raw value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns true if `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Borrow the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Stable JSON serialization (sorted keys, compact).
    #[must_use]
    pub fn canonical_json(&self) -> String {
        canonical_json_or_debug(&self.0)
    }

    /// Coerce every value to text without any checks.
    #[must_use]
    pub fn to_text_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), coerce_to_text(value)))
            .collect()
    }
}

/// Compact JSON used as cache-key material.
///
/// A serialization failure is logged and falls back to the `Debug` rendering
/// under a `debug:` prefix, so distinct values never share a key.
pub(crate) fn canonical_json_or_debug<T: Serialize + fmt::Debug>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Canonical JSON failed, keying by Debug form");
        format!("debug:{value:?}")
    })
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, Value>> for ParameterSet {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Coerce a structured value to the text that enters a template.
///
/// Strings pass through, scalars use their JSON text, null becomes empty and
/// arrays/objects become compact JSON.
#[must_use]
pub fn coerce_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Expected type of a schema-declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// Any scalar, coerced to text. Arrays and objects are rejected.
    String,
    /// A JSON number or a string that parses as one.
    Number,
    /// A JSON boolean or the strings `true`/`false`.
    Boolean,
    /// One of a fixed set of strings.
    Enum {
        /// Allowed values.
        choices: Vec<String>,
    },
}

/// Constraints for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Expected type.
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Whether the field must be present.
    #[serde(default)]
    pub required: bool,
    /// Per-field override of the global length limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl FieldSchema {
    const fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            max_length: None,
        }
    }

    /// A free-text field.
    #[must_use]
    pub const fn string() -> Self {
        Self::of(FieldType::String)
    }

    /// A numeric field.
    #[must_use]
    pub const fn number() -> Self {
        Self::of(FieldType::Number)
    }

    /// A boolean field.
    #[must_use]
    pub const fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    /// An enumerated field.
    #[must_use]
    pub fn one_of<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::of(FieldType::Enum {
            choices: choices.into_iter().map(Into::into).collect(),
        })
    }

    /// Mark the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Override the length limit for this field.
    #[must_use]
    pub const fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

/// Declared fields of a template.
///
/// Deserializes from a JSON object keyed by field name:
///
/// ```
/// use prompt_assembler::params::{FieldType, ParameterSchema};
///
/// let schema: ParameterSchema = serde_json::from_str(
///     r#"{"tone": {"type": "enum", "choices": ["formal", "casual"], "required": true}}"#,
/// ).unwrap();
/// let tone = schema.get("tone").unwrap();
/// assert!(tone.required);
/// assert!(matches!(tone.field_type, FieldType::Enum { .. }));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    fields: BTreeMap<String, FieldSchema>,
}

impl ParameterSchema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field declaration.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    /// Look up a field declaration.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    /// Iterate over declared fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSchema)> {
        self.fields.iter()
    }
}
