//! Stage 1: length, character-class and type checks on raw values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{PromptError, Violation, ViolationRule};
use crate::params::{coerce_to_text, FieldSchema, FieldType, ParameterSchema, ParameterSet};

/// Fraction of the length limit above which a warning is recorded.
const LENGTH_WARNING_RATIO: f64 = 0.9;

/// Outcome of validating one parameter set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when `errors` is empty.
    pub is_valid: bool,
    /// Hard failures.
    pub errors: Vec<Violation>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
    /// Values coerced to text (and, after the sanitize stage, sanitized).
    pub sanitized_input: BTreeMap<String, String>,
}

impl ValidationResult {
    /// Convert into the text map, or a [`PromptError::Validation`].
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Validation`] carrying every collected violation
    /// if the result is not valid.
    pub fn into_result(self) -> Result<BTreeMap<String, String>, PromptError> {
        if self.is_valid {
            Ok(self.sanitized_input)
        } else {
            Err(PromptError::Validation {
                errors: self.errors,
            })
        }
    }
}

/// Checks raw values against length, character and schema constraints.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_length: usize,
}

impl Validator {
    /// Create a validator with a global per-value length limit.
    #[must_use]
    pub const fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// The global length limit.
    #[must_use]
    pub const fn max_length(&self) -> usize {
        self.max_length
    }

    /// Validate every parameter, collecting all violations.
    #[must_use]
    pub fn validate(
        &self,
        params: &ParameterSet,
        schema: Option<&ParameterSchema>,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut sanitized_input = BTreeMap::new();

        if let Some(schema) = schema {
            for (name, field) in schema.fields() {
                if field.required && !params.contains(name) {
                    errors.push(Violation::new(
                        name,
                        ViolationRule::RequiredField,
                        "required field is absent",
                    ));
                }
            }
        }

        for (name, value) in params.iter() {
            let field = schema.and_then(|s| s.get(name));
            if schema.is_some() && field.is_none() {
                warnings.push(format!("parameter {name} is not declared in the schema"));
            }

            match self.check_value(name, value, field, &mut warnings) {
                Ok(text) => {
                    sanitized_input.insert(name.clone(), text);
                }
                Err(mut violations) => errors.append(&mut violations),
            }
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            sanitized_input,
        }
    }

    fn check_value(
        &self,
        name: &str,
        value: &Value,
        field: Option<&FieldSchema>,
        warnings: &mut Vec<String>,
    ) -> Result<String, Vec<Violation>> {
        let text = match field {
            Some(field) => coerce_typed(name, value, &field.field_type).map_err(|v| vec![v])?,
            None => coerce_to_text(value),
        };

        let mut violations = Vec::new();
        let limit = field
            .and_then(|f| f.max_length)
            .unwrap_or(self.max_length);
        let length = text.chars().count();

        if length > limit {
            violations.push(Violation::new(
                name,
                ViolationRule::MaxLength,
                format!("value has {length} characters; limit is {limit}"),
            ));
        } else if length_warning_due(length, limit) {
            warnings.push(format!(
                "parameter {name} is close to the length limit ({length}/{limit})"
            ));
        }

        if let Some(c) = text.chars().find(|c| is_forbidden_control(*c)) {
            violations.push(Violation::new(
                name,
                ViolationRule::ControlCharacter,
                format!("value contains control character U+{:04X}", u32::from(c)),
            ));
        }

        if violations.is_empty() {
            Ok(text)
        } else {
            Err(violations)
        }
    }
}

/// Raw control characters other than tab, newline and carriage return.
#[must_use]
pub fn is_forbidden_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

#[allow(clippy::cast_precision_loss)]
fn length_warning_due(length: usize, limit: usize) -> bool {
    length as f64 > limit as f64 * LENGTH_WARNING_RATIO
}

fn coerce_typed(name: &str, value: &Value, field_type: &FieldType) -> Result<String, Violation> {
    let mismatch = |expected: &str| {
        Violation::new(
            name,
            ViolationRule::TypeMismatch,
            format!("expected {expected}, got {}", json_type_name(value)),
        )
    };

    match field_type {
        FieldType::String => match value {
            Value::Array(_) | Value::Object(_) => Err(mismatch("string")),
            _ => Ok(coerce_to_text(value)),
        },
        FieldType::Number => match value {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) if s.trim().parse::<f64>().is_ok_and(f64::is_finite) => {
                Ok(s.trim().to_string())
            }
            _ => Err(mismatch("number")),
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(b.to_string()),
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok("true".to_string()),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok("false".to_string()),
            _ => Err(mismatch("boolean")),
        },
        FieldType::Enum { choices } => {
            let text = coerce_to_text(value);
            if choices.iter().any(|c| c == &text) {
                Ok(text)
            } else {
                Err(Violation::new(
                    name,
                    ViolationRule::NotInEnum,
                    format!("value must be one of: {}", choices.join(", ")),
                ))
            }
        }
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
