//! Combining prompt fragments into one prompt.
//!
//! # Example
//!
//! ```
//! use prompt_assembler::composer::{Composer, CompositionStrategy};
//!
//! let composer = Composer::default();
//! let parts = vec!["A".to_string(), "B".to_string()];
//! assert_eq!(
//!     composer.compose_parts(&parts, CompositionStrategy::Sequential).unwrap(),
//!     "A\n---\nB"
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PromptError;

/// Default separator for sequential composition.
pub const DEFAULT_SEPARATOR: &str = "\n---\n";

/// How fragments are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionStrategy {
    /// Fragments joined by the separator, in order.
    #[default]
    Sequential,
    /// Each fragment under its own `## Section N` heading.
    Parallel,
    /// First fragment is primary; the rest follow under `## Additional Context`.
    Hierarchical,
}

impl CompositionStrategy {
    /// Strategy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Hierarchical => "hierarchical",
        }
    }
}

impl fmt::Display for CompositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompositionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "hierarchical" => Ok(Self::Hierarchical),
            other => Err(format!("unknown composition strategy: {other}")),
        }
    }
}

/// One fragment, optionally titled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Heading used by the parallel and hierarchical layouts in place of the
    /// numbered default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Fragment text.
    pub body: String,
}

impl Section {
    /// An untitled section.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            title: None,
            body: body.into(),
        }
    }

    /// A titled section.
    #[must_use]
    pub fn titled(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: body.into(),
        }
    }
}

impl From<String> for Section {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

impl From<&str> for Section {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

/// Fragments plus the layout to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionRequest {
    /// Fragments in order.
    pub sections: Vec<Section>,
    /// Layout.
    #[serde(default)]
    pub strategy: CompositionStrategy,
}

impl CompositionRequest {
    /// Create a request.
    #[must_use]
    pub const fn new(sections: Vec<Section>, strategy: CompositionStrategy) -> Self {
        Self { sections, strategy }
    }
}

/// Lays out fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composer {
    separator: String,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl Composer {
    /// Composer with a custom sequential separator.
    #[must_use]
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    /// Sequential separator.
    #[must_use]
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Compose plain fragments.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::EmptyComposition`] if `parts` is empty.
    pub fn compose_parts(
        &self,
        parts: &[String],
        strategy: CompositionStrategy,
    ) -> Result<String, PromptError> {
        let sections: Vec<Section> = parts.iter().map(|p| Section::new(p.as_str())).collect();
        self.compose_sections(&sections, strategy)
    }

    /// Compose a request.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::EmptyComposition`] if the request has no
    /// sections.
    pub fn compose(&self, request: &CompositionRequest) -> Result<String, PromptError> {
        self.compose_sections(&request.sections, request.strategy)
    }

    fn compose_sections(
        &self,
        sections: &[Section],
        strategy: CompositionStrategy,
    ) -> Result<String, PromptError> {
        match sections {
            [] => Err(PromptError::EmptyComposition),
            [only] => Ok(only.body.clone()),
            _ => Ok(match strategy {
                CompositionStrategy::Sequential => self.sequential(sections),
                CompositionStrategy::Parallel => Self::parallel(sections),
                CompositionStrategy::Hierarchical => Self::hierarchical(sections),
            }),
        }
    }

    fn sequential(&self, sections: &[Section]) -> String {
        sections
            .iter()
            .map(|s| s.body.as_str())
            .collect::<Vec<_>>()
            .join(&self.separator)
    }

    fn parallel(sections: &[Section]) -> String {
        sections
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let heading = s
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("Section {}", i + 1));
                format!("## {heading}\n{}", s.body)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn hierarchical(sections: &[Section]) -> String {
        let (primary, rest) = match sections.split_first() {
            Some(split) => split,
            None => return String::new(),
        };

        let mut out = primary.body.clone();
        out.push_str("\n\n## Additional Context");
        for (i, s) in rest.iter().enumerate() {
            let heading = s
                .title
                .clone()
                .unwrap_or_else(|| format!("Context {}", i + 1));
            out.push_str(&format!("\n\n### {heading}\n{}", s.body));
        }
        out
    }
}
