//! Prompt templates with `{identifier}` placeholders.
//!
//! A [`Template`] is immutable once constructed: its variable list is derived
//! from the body at construction time. Braces that do not enclose a valid
//! identifier (`[A-Za-z_][A-Za-z0-9_]*`) are kept as literal text, so JSON
//! snippets inside templates survive untouched.
//!
//! Substitution is a single left-to-right pass. Substituted values are never
//! scanned again, so a value containing `{other}` stays literal.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use prompt_assembler::template::Template;
//!
//! let template = Template::new("greeting", "Hello {name}!");
//! assert_eq!(template.variables(), ["name"]);
//!
//! let mut values = BTreeMap::new();
//! values.insert("name".to_string(), "World".to_string());
//! assert_eq!(template.fill(&values).unwrap(), "Hello World!");
//! ```

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::PromptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Length of the identifier at the start of `rest` if it is followed by `}`.
fn placeholder_len(rest: &[u8]) -> Option<usize> {
    let first = *rest.first()?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let len = rest
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    (rest.get(len) == Some(&b'}')).then_some(len)
}

fn parse_segments(body: &str) -> Vec<Segment<'_>> {
    let bytes = body.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(len) = placeholder_len(&bytes[i + 1..]) {
                if literal_start < i {
                    segments.push(Segment::Literal(&body[literal_start..i]));
                }
                segments.push(Segment::Placeholder(&body[i + 1..=i + len]));
                i += len + 2;
                literal_start = i;
                continue;
            }
        }
        i += 1;
    }

    if literal_start < bytes.len() {
        segments.push(Segment::Literal(&body[literal_start..]));
    }
    segments
}

/// Non-fatal notice that a parameter was supplied but never referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnusedVariableWarning {
    /// Template identifier.
    pub template: String,
    /// Parameter name that was not referenced.
    pub variable: String,
}

impl fmt::Display for UnusedVariableWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter {} is not referenced by template {}",
            self.variable, self.template
        )
    }
}

/// Output of [`Template::fill_with_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilledTemplate {
    /// Filled template text.
    pub text: String,
    /// Parameters that the template never referenced.
    pub warnings: Vec<UnusedVariableWarning>,
}

/// An immutable prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    id: String,
    body: String,
    variables: Vec<String>,
}

impl Template {
    /// Parse a template body under the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let mut seen = HashSet::new();
        let variables = parse_segments(&body)
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(name) if seen.insert(name) => Some(name.to_string()),
                _ => None,
            })
            .collect();

        Self {
            id: id.into(),
            body,
            variables,
        }
    }

    /// Parse a template whose identifier is derived from its body.
    #[must_use]
    pub fn inline(body: impl Into<String>) -> Self {
        let body = body.into();
        let digest = hex::encode(Sha256::digest(body.as_bytes()));
        Self::new(format!("inline:{}", &digest[..16]), body)
    }

    /// Template identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw template body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Distinct placeholder names in order of first appearance.
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Returns true if the body references `name`.
    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }

    /// Placeholders with no entry in `values`, in template order.
    #[must_use]
    pub fn missing_variables<V>(&self, values: &BTreeMap<String, V>) -> Vec<String> {
        self.variables
            .iter()
            .filter(|name| !values.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    /// Entries in `values` the body never references, sorted.
    #[must_use]
    pub fn unused_variables<V>(&self, values: &BTreeMap<String, V>) -> Vec<String> {
        values
            .keys()
            .filter(|name| !self.references(name))
            .cloned()
            .collect()
    }

    /// Substitute every placeholder with its value.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::MissingVariables`] naming every placeholder that
    /// has no value. Nothing is substituted in that case.
    pub fn fill(&self, values: &BTreeMap<String, String>) -> Result<String, PromptError> {
        let missing = self.missing_variables(values);
        if !missing.is_empty() {
            return Err(PromptError::MissingVariables {
                template: self.id.clone(),
                variables: missing,
            });
        }

        let mut out = String::with_capacity(self.body.len());
        for segment in parse_segments(&self.body) {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some(value) = values.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Like [`fill`](Self::fill), also reporting unreferenced parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::MissingVariables`] under the same conditions as
    /// [`fill`](Self::fill).
    pub fn fill_with_report(
        &self,
        values: &BTreeMap<String, String>,
    ) -> Result<FilledTemplate, PromptError> {
        let text = self.fill(values)?;
        let warnings: Vec<UnusedVariableWarning> = self
            .unused_variables(values)
            .into_iter()
            .map(|variable| UnusedVariableWarning {
                template: self.id.clone(),
                variable,
            })
            .collect();

        for warning in &warnings {
            tracing::warn!(
                template = %warning.template,
                variable = %warning.variable,
                "Unused template parameter"
            );
        }

        Ok(FilledTemplate { text, warnings })
    }
}
