//! Prompt Assembler
//!
//! Builds LLM prompts from templates and untrusted parameters, with a
//! layered defense against prompt injection.
//!
//! # Features
//!
//! - `{name}` placeholder templates loaded from disk or memory
//! - Validation, sanitization, pattern-based risk scoring and delimiter
//!   escaping of every parameter value
//! - Sequential, parallel and hierarchical composition of filled templates
//! - LRU + TTL cache keyed by a stable fingerprint of template and parameters
//! - Counters and histograms through a pluggable metrics sink
//!
//! # Quick Start
//!
//! ```bash
//! PROMPT_TEMPLATE_DIR=./prompts ./prompt-assembler fill greeting -p name=World
//! ```
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────── SecurityPipeline ───────────────────┐
//! params ─────────▶│ Validator ─▶ Sanitizer ─▶ InjectionDetector ─▶ Escaper  │
//!                  └──────────────────────────────┬──────────────────────────┘
//!                                                 ▼
//! TemplateLoader ─▶ Template ─────────────────▶ fill ─▶ Composer ─▶ PromptCache
//!                                                                      │
//!                                                                      ▼
//!                                                                 LlmProvider
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod composer;
pub mod config;
pub mod error;
pub mod loader;
pub mod manager;
pub mod metrics;
pub mod params;
pub mod security;
pub mod template;
pub mod traits;

#[cfg(test)]
mod test_utils;
