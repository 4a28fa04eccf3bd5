//! Error types for the prompt assembler.
//!
//! This module defines a hierarchical error system:
//! - [`AppError`]: Top-level errors surfaced by the binary
//! - [`PromptError`]: The single taxonomy returned by [`PromptManager`](crate::manager::PromptManager)
//! - [`LoaderError`]: Template/context loader failures
//! - [`ProviderError`]: LLM provider hand-off failures
//! - [`ConfigError`]: Configuration errors
//!
//! All errors implement `Send + Sync`. No variant carries a rejected raw
//! value: diagnostics name the field and the rule that fired.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::security::ValidationResult;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    /// Prompt assembly error.
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Output could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Rule identifier attached to a [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationRule {
    /// Value exceeds the configured maximum length.
    MaxLength,
    /// Value contains raw control characters.
    ControlCharacter,
    /// Value does not match the declared schema type.
    TypeMismatch,
    /// Value is not one of the declared enum choices.
    NotInEnum,
    /// Field required by the schema is absent.
    RequiredField,
    /// Template placeholder has no matching parameter.
    MissingVariable,
    /// Strict-mode detection blocked the value.
    InjectionDetected,
    /// Composition was requested with no sections.
    EmptyComposition,
    /// Template or context does not exist.
    NotFound,
    /// Loader failed for a reason other than absence.
    LoaderFailure,
    /// LLM provider rejected or failed the request.
    ProviderFailure,
}

impl ViolationRule {
    /// Returns the rule identifier as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MaxLength => "max_length",
            Self::ControlCharacter => "control_character",
            Self::TypeMismatch => "type_mismatch",
            Self::NotInEnum => "not_in_enum",
            Self::RequiredField => "required_field",
            Self::MissingVariable => "missing_variable",
            Self::InjectionDetected => "injection_detected",
            Self::EmptyComposition => "empty_composition",
            Self::NotFound => "not_found",
            Self::LoaderFailure => "loader_failure",
            Self::ProviderFailure => "provider_failure",
        }
    }
}

impl fmt::Display for ViolationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single rule violation attributed to one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Field (parameter name) the violation applies to.
    pub field: String,
    /// Rule that was violated.
    pub rule: ViolationRule,
    /// Human-readable description. Never contains the raw value.
    pub message: String,
}

impl Violation {
    /// Create a new violation.
    #[must_use]
    pub fn new(field: impl Into<String>, rule: ViolationRule, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.field, self.rule, self.message)
    }
}

/// Coarse error category, for callers that branch on one taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Template/parameter mismatch.
    MissingVariable,
    /// Bad shape, length or characters.
    Validation,
    /// Blocked by strict-mode detection.
    InjectionDetected,
    /// Composition with no input.
    EmptyComposition,
    /// Template or context not found.
    NotFound,
    /// Other loader failure.
    Loader,
    /// LLM provider failure.
    Provider,
}

impl ErrorKind {
    /// Returns the category as a string, as used in metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingVariable => "missing_variable",
            Self::Validation => "validation",
            Self::InjectionDetected => "injection_detected",
            Self::EmptyComposition => "empty_composition",
            Self::NotFound => "not_found",
            Self::Loader => "loader",
            Self::Provider => "provider",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prompt assembly errors.
///
/// Every security-stage error is terminal for the current call and leaves no
/// partial state behind (the cache is only written after full success).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PromptError {
    /// One or more template placeholders have no parameter.
    #[error("Missing variables for template {template}: {}", .variables.join(", "))]
    MissingVariables {
        /// Template identifier.
        template: String,
        /// Every missing placeholder name, in template order.
        variables: Vec<String>,
    },

    /// Parameter validation failed.
    #[error("Validation failed: {}", format_violations(.errors))]
    Validation {
        /// All violations collected during validation.
        errors: Vec<Violation>,
    },

    /// Strict-mode detection blocked a parameter.
    #[error("Injection detected in field {field}: risk score {risk_score:.2} (flags: {})", .flags.join(", "))]
    InjectionDetected {
        /// Field whose value was blocked.
        field: String,
        /// Risk score of the blocked value.
        risk_score: f64,
        /// Flags that contributed to the score.
        flags: Vec<String>,
    },

    /// Composition was requested with zero templates.
    #[error("Cannot compose an empty set of templates")]
    EmptyComposition,

    /// Loader collaborator error, propagated unchanged.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// LLM provider collaborator error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn format_violations(errors: &[Violation]) -> String {
    errors
        .iter()
        .map(|v| format!("{} [{}]", v.field, v.rule))
        .collect::<Vec<_>>()
        .join(", ")
}

impl PromptError {
    /// Returns the coarse category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingVariables { .. } => ErrorKind::MissingVariable,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InjectionDetected { .. } => ErrorKind::InjectionDetected,
            Self::EmptyComposition => ErrorKind::EmptyComposition,
            Self::Loader(LoaderError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Loader(_) => ErrorKind::Loader,
            Self::Provider(_) => ErrorKind::Provider,
        }
    }

    /// HTTP-equivalent status for surfacing the error to an operator.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::MissingVariable | ErrorKind::Validation => 400,
            ErrorKind::InjectionDetected => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::EmptyComposition | ErrorKind::Loader => 500,
            ErrorKind::Provider => 502,
        }
    }

    /// Returns true if the caller can fix the request and try again.
    ///
    /// Nothing is retried internally; injection blocks are never retryable.
    #[must_use]
    pub const fn is_caller_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MissingVariable | ErrorKind::Validation | ErrorKind::NotFound
        )
    }

    /// Flattens the error into field/rule violations.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        match self {
            Self::MissingVariables { variables, .. } => variables
                .iter()
                .map(|name| {
                    Violation::new(
                        name,
                        ViolationRule::MissingVariable,
                        "template placeholder has no parameter",
                    )
                })
                .collect(),
            Self::Validation { errors } => errors.clone(),
            Self::InjectionDetected {
                field,
                risk_score,
                flags,
            } => vec![Violation::new(
                field,
                ViolationRule::InjectionDetected,
                format!("risk score {risk_score:.2}; flags: {}", flags.join(", ")),
            )],
            Self::EmptyComposition => vec![Violation::new(
                "templates",
                ViolationRule::EmptyComposition,
                "at least one template is required",
            )],
            Self::Loader(LoaderError::NotFound { path }) => vec![Violation::new(
                path,
                ViolationRule::NotFound,
                "no template or context at this path",
            )],
            Self::Loader(LoaderError::Io { path, message }) => {
                vec![Violation::new(path, ViolationRule::LoaderFailure, message)]
            }
            Self::Provider(err) => vec![Violation::new(
                "prompt",
                ViolationRule::ProviderFailure,
                err.to_string(),
            )],
        }
    }

    /// Renders the error as a failed [`ValidationResult`].
    #[must_use]
    pub fn to_validation_result(&self) -> ValidationResult {
        ValidationResult {
            is_valid: false,
            errors: self.violations(),
            warnings: Vec::new(),
            sanitized_input: std::collections::BTreeMap::new(),
        }
    }

    /// Field the error is attributed to, when there is exactly one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InjectionDetected { field, .. } => Some(field.as_str()),
            Self::Validation { errors } if errors.len() == 1 => Some(errors[0].field.as_str()),
            Self::MissingVariables { variables, .. } if variables.len() == 1 => {
                Some(variables[0].as_str())
            }
            _ => None,
        }
    }
}

/// Loader collaborator errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// The template or context does not exist.
    #[error("Not found: {path}")]
    NotFound {
        /// Requested path.
        path: String,
    },

    /// Reading the source failed.
    #[error("Failed to read {path}: {message}")]
    Io {
        /// Requested path.
        path: String,
        /// Description of the failure.
        message: String,
    },
}

/// LLM provider errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider could not be reached.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// Provider rejected the prompt.
    #[error("Provider rejected request: {message}")]
    Rejected {
        /// Description of the rejection.
        message: String,
    },
}

/// Configuration errors.
///
/// These errors represent failures in configuration loading and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required configuration is missing.
    #[error("Missing required: {var}")]
    MissingRequired {
        /// The missing variable name.
        var: String,
    },

    /// Configuration value is invalid.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// The variable name.
        var: String,
        /// Why the value is invalid.
        reason: String,
    },
}
