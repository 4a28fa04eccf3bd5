//! Template and context sources.
//!
//! [`TemplateLoader`] is the synchronous collaborator the manager pulls
//! template bodies and context documents from. Timeouts and retries belong
//! to the implementation.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use crate::error::LoaderError;

/// Extensions tried, in order, when the exact path does not exist.
pub const TEMPLATE_EXTENSIONS: &[&str] = &["prompt", "txt", "md"];

/// Source of template bodies and context documents.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateLoader: Send + Sync {
    /// Load the text stored under `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::NotFound`] if nothing is stored under `path`, or
    /// [`LoaderError::Io`] if it exists but cannot be read.
    fn load(&self, path: &str) -> Result<String, LoaderError>;
}

impl std::fmt::Debug for dyn TemplateLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TemplateLoader")
    }
}

/// Loads files below a root directory.
///
/// Absolute paths and paths with `..` components are reported as not found.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    /// Create a loader rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, path: &str) -> Option<Vec<PathBuf>> {
        let relative = Path::new(path);
        let confined = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return None;
        }

        let exact = self.root.join(relative);
        let mut candidates = vec![exact.clone()];
        if relative.extension().is_none() {
            candidates.extend(
                TEMPLATE_EXTENSIONS
                    .iter()
                    .map(|ext| exact.with_extension(ext)),
            );
        }
        Some(candidates)
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, path: &str) -> Result<String, LoaderError> {
        let Some(candidates) = self.candidates(path) else {
            tracing::warn!(path = %path, "Rejected template path outside the loader root");
            return Err(LoaderError::NotFound { path: path.into() });
        };

        for candidate in candidates {
            if !candidate.is_file() {
                continue;
            }
            return std::fs::read_to_string(&candidate).map_err(|e| {
                tracing::error!(path = %candidate.display(), error = %e, "Failed to read template");
                LoaderError::Io {
                    path: path.into(),
                    message: e.to_string(),
                }
            });
        }

        Err(LoaderError::NotFound { path: path.into() })
    }
}

/// Loader backed by an in-process map.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    templates: RwLock<HashMap<String, String>>,
}

impl InMemoryLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(self, path: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(path, body);
        self
    }

    /// Store or replace a body.
    pub fn insert(&self, path: impl Into<String>, body: impl Into<String>) {
        let path = path.into();
        match self.templates.write() {
            Ok(mut templates) => {
                templates.insert(path, body.into());
            }
            Err(poison_error) => {
                tracing::error!(
                    path = %path,
                    error = %poison_error,
                    "Failed to store template: RwLock poisoned"
                );
            }
        }
    }

    /// Remove a body. Returns true if it existed.
    pub fn remove(&self, path: &str) -> bool {
        self.templates
            .write()
            .map(|mut t| t.remove(path).is_some())
            .unwrap_or(false)
    }
}

impl TemplateLoader for InMemoryLoader {
    fn load(&self, path: &str) -> Result<String, LoaderError> {
        let templates = self.templates.read().map_err(|e| LoaderError::Io {
            path: path.into(),
            message: e.to_string(),
        })?;
        templates
            .get(path)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound { path: path.into() })
    }
}
