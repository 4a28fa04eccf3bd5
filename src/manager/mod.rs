//! The prompt assembly façade.
//!
//! [`PromptManager`] loads templates through a [`TemplateLoader`], gates
//! parameters through the [`SecurityPipeline`], fills and composes, and
//! caches the result. Every failure surfaces as a [`PromptError`].
//!
//! # Example
//!
//! ```
//! use prompt_assembler::config::Config;
//! use prompt_assembler::loader::InMemoryLoader;
//! use prompt_assembler::manager::PromptManager;
//! use prompt_assembler::params::ParameterSet;
//! use prompt_assembler::security::Escaper;
//! use std::sync::Arc;
//!
//! let loader = Arc::new(InMemoryLoader::new().with("greeting", "Hello {name}!"));
//! let manager = PromptManager::new(Config::default(), loader);
//!
//! let prompt = manager
//!     .fill_template("greeting", &ParameterSet::new().with("name", "World"))
//!     .unwrap();
//! assert_eq!(Escaper::strip_delimiters(&prompt), "Hello World!");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::cache::{fingerprint, fingerprint_parts, CacheStats, PromptCache};
use crate::composer::{Composer, CompositionRequest, CompositionStrategy, Section};
use crate::config::Config;
use crate::error::PromptError;
use crate::loader::TemplateLoader;
use crate::metrics::{
    MetricsSink, NoopMetrics, Timer, OPERATIONS_TOTAL, OPERATION_DURATION_SECONDS,
};
use crate::params::{canonical_json_or_debug, ParameterSchema, ParameterSet};
use crate::security::{
    DetectionResult, InjectionDetector, SecurityPipeline, SecurityReport,
};
use crate::template::{Template, UnusedVariableWarning};
use crate::traits::{LlmProvider, RealTimeProvider, TimeProvider};

/// One template to fill as part of a [`PromptRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCall {
    /// Template path for the loader.
    pub id: String,
    /// Parameters for this template.
    #[serde(default)]
    pub params: ParameterSet,
}

impl TemplateCall {
    /// Create a call.
    #[must_use]
    pub fn new(id: impl Into<String>, params: ParameterSet) -> Self {
        Self {
            id: id.into(),
            params,
        }
    }
}

/// Several templates plus context documents, composed into one prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Templates, filled in order.
    pub templates: Vec<TemplateCall>,
    /// Context document paths, appended after the templates as titled
    /// sections.
    #[serde(default)]
    pub context: Vec<String>,
    /// Layout.
    #[serde(default)]
    pub strategy: CompositionStrategy,
}

impl PromptRequest {
    /// Stable serialization used for the request-level cache key.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        canonical_json_or_debug(self)
    }
}

/// A filled template with everything observed while filling it.
#[derive(Debug, Clone, PartialEq)]
pub struct FilledPrompt {
    /// Prompt text with escaped values.
    pub text: String,
    /// Served from the cache. When true, `report` is `None` and `warnings`
    /// is empty.
    pub cached: bool,
    /// Security pipeline report.
    pub report: Option<SecurityReport>,
    /// Parameters the template never referenced.
    pub warnings: Vec<UnusedVariableWarning>,
}

/// Prompt assembly façade.
#[derive(Debug)]
pub struct PromptManager {
    config: Config,
    loader: Arc<dyn TemplateLoader>,
    pipeline: SecurityPipeline,
    composer: Composer,
    cache: PromptCache,
    schemas: RwLock<HashMap<String, ParameterSchema>>,
    schema_generation: AtomicU64,
    metrics: Arc<dyn MetricsSink>,
    detector: Option<Arc<dyn InjectionDetector>>,
    clock: Arc<dyn TimeProvider>,
}

impl PromptManager {
    /// Create a manager with the default detector, no metrics and the
    /// system clock.
    #[must_use]
    pub fn new(config: Config, loader: Arc<dyn TemplateLoader>) -> Self {
        let metrics: Arc<dyn MetricsSink> = Arc::new(NoopMetrics);
        let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);
        Self {
            pipeline: SecurityPipeline::new(config.security(), Arc::clone(&metrics)),
            composer: Composer::default(),
            cache: Self::build_cache(&config, &metrics, &clock),
            schemas: RwLock::new(HashMap::new()),
            schema_generation: AtomicU64::new(0),
            detector: None,
            loader,
            metrics,
            clock,
            config,
        }
    }

    /// Record metrics into `metrics`.
    ///
    /// Rebuilds the pipeline and cache; call before first use.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self.rebuild();
        self
    }

    /// Replace the injection detector.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn InjectionDetector>) -> Self {
        self.detector = Some(detector);
        self.rebuild();
        self
    }

    /// Use another clock for cache expiry.
    ///
    /// Rebuilds the cache; call before first use.
    #[must_use]
    pub fn with_time_provider(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self.cache = Self::build_cache(&self.config, &self.metrics, &self.clock);
        self
    }

    /// Use a custom sequential separator.
    #[must_use]
    pub fn with_composer(mut self, composer: Composer) -> Self {
        self.composer = composer;
        self
    }

    fn build_cache(
        config: &Config,
        metrics: &Arc<dyn MetricsSink>,
        clock: &Arc<dyn TimeProvider>,
    ) -> PromptCache {
        PromptCache::new(config.cache_max_size, config.cache_default_ttl())
            .with_metrics(Arc::clone(metrics))
            .with_time_provider(Arc::clone(clock))
    }

    fn rebuild(&mut self) {
        let mut pipeline = SecurityPipeline::new(self.config.security(), Arc::clone(&self.metrics));
        if let Some(detector) = &self.detector {
            pipeline = pipeline.with_detector(Arc::clone(detector));
        }
        self.pipeline = pipeline;
        self.cache = Self::build_cache(&self.config, &self.metrics, &self.clock);
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The security pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &SecurityPipeline {
        &self.pipeline
    }

    /// Load and parse a template.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Loader`] if the loader fails.
    pub fn load_template(&self, id: &str) -> Result<Template, PromptError> {
        let body = self.loader.load(id)?;
        Ok(Template::new(id, body))
    }

    /// Load a context document verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Loader`] if the loader fails.
    pub fn load_context(&self, path: &str) -> Result<String, PromptError> {
        Ok(self.loader.load(path)?)
    }

    /// Declare parameter types for a template. Replaces any earlier schema.
    ///
    /// Drops every cached prompt: entries filled under the previous schema,
    /// including request-level entries that embed this template, must be
    /// validated again.
    pub fn register_schema(&self, id: impl Into<String>, schema: ParameterSchema) {
        let id = id.into();
        match self.schemas.write() {
            Ok(mut schemas) => {
                schemas.insert(id.clone(), schema);
                self.schema_generation.fetch_add(1, Ordering::SeqCst);
            }
            Err(poison_error) => {
                tracing::error!(
                    template = %id,
                    error = %poison_error,
                    "Failed to register schema: RwLock poisoned"
                );
                return;
            }
        }
        self.cache.clear();
        tracing::info!(template = %id, "Schema registered, prompt cache cleared");
    }

    /// Store `text` unless a schema was registered since `generation` was
    /// read, in which case the value was secured under a stale schema.
    fn cache_if_current(&self, generation: u64, key: String, text: String) {
        if self.schema_generation.load(Ordering::SeqCst) == generation {
            self.cache.set_by_key(key, text, None);
        } else {
            tracing::debug!("Schema changed during fill, result not cached");
        }
    }

    fn schema_for(&self, id: &str) -> Option<ParameterSchema> {
        self.schemas
            .read()
            .ok()
            .and_then(|schemas| schemas.get(id).cloned())
    }

    /// Load, secure, fill and cache a template.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Loader`], [`PromptError::MissingVariables`],
    /// [`PromptError::Validation`] or [`PromptError::InjectionDetected`].
    /// Nothing is cached on failure.
    pub fn fill_template(&self, id: &str, params: &ParameterSet) -> Result<String, PromptError> {
        self.fill_template_detailed(id, params).map(|filled| filled.text)
    }

    /// Like [`fill_template`](Self::fill_template), also returning the
    /// security report and unused-parameter warnings.
    ///
    /// # Errors
    ///
    /// See [`fill_template`](Self::fill_template).
    pub fn fill_template_detailed(
        &self,
        id: &str,
        params: &ParameterSet,
    ) -> Result<FilledPrompt, PromptError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("fill_template", %request_id, template = %id);
        let _guard = span.enter();
        let timer = Timer::start();

        let key = fingerprint(id, params);
        let generation = self.schema_generation.load(Ordering::SeqCst);
        let result = match self.cache.get_by_key(&key) {
            Some(text) => Ok(FilledPrompt {
                text,
                cached: true,
                report: None,
                warnings: Vec::new(),
            }),
            None => self.load_template(id).and_then(|template| {
                let filled = self.secure_and_fill(request_id, &template, params)?;
                self.cache_if_current(generation, key, filled.text.clone());
                Ok(filled)
            }),
        };

        self.record("fill_template", &timer, &result);
        result
    }

    /// Secure and fill a caller-held template.
    ///
    /// The cache key covers the template body as well as its id, so an
    /// edited template never serves a stale prompt.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::MissingVariables`], [`PromptError::Validation`]
    /// or [`PromptError::InjectionDetected`].
    pub fn fill(&self, template: &Template, params: &ParameterSet) -> Result<String, PromptError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("fill", %request_id, template = %template.id());
        let _guard = span.enter();
        let timer = Timer::start();

        let identity = format!("{}\0{}", template.id(), template.body());
        let key = fingerprint_parts(&identity, &params.canonical_json());
        let generation = self.schema_generation.load(Ordering::SeqCst);
        let result = match self.cache.get_by_key(&key) {
            Some(text) => Ok(text),
            None => self
                .secure_and_fill(request_id, template, params)
                .map(|filled| {
                    self.cache_if_current(generation, key, filled.text.clone());
                    filled.text
                }),
        };

        self.record("fill", &timer, &result);
        result
    }

    fn secure_and_fill(
        &self,
        request_id: Uuid,
        template: &Template,
        params: &ParameterSet,
    ) -> Result<FilledPrompt, PromptError> {
        let missing = template.missing_variables(params.as_map());
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Template is missing variables");
            return Err(PromptError::MissingVariables {
                template: template.id().to_string(),
                variables: missing,
            });
        }

        let schema = self.schema_for(template.id());
        let secured =
            self.pipeline
                .process_with_id(request_id, template.id(), params, schema.as_ref())?;
        let filled = template.fill_with_report(&secured.values)?;

        Ok(FilledPrompt {
            text: filled.text,
            cached: false,
            report: Some(secured.report),
            warnings: filled.warnings,
        })
    }

    /// Compose already-filled fragments.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::EmptyComposition`] if `parts` is empty.
    pub fn compose(
        &self,
        parts: &[String],
        strategy: CompositionStrategy,
    ) -> Result<String, PromptError> {
        let timer = Timer::start();
        let result = self.composer.compose_parts(parts, strategy);
        self.record("compose", &timer, &result);
        result
    }

    /// Fill several templates, append context documents, compose and cache
    /// the whole prompt.
    ///
    /// The request-level entry is written only after every part succeeds.
    /// Each template part goes through [`fill_template`](Self::fill_template)
    /// and is cached on its own as it succeeds, so a later failing part leaves
    /// the earlier parts cached. This is intended: those parts passed the full
    /// pipeline and are valid on their own.
    ///
    /// # Errors
    ///
    /// Any error from [`fill_template`](Self::fill_template) or
    /// [`load_context`](Self::load_context), or
    /// [`PromptError::EmptyComposition`] for a request with neither
    /// templates nor context.
    pub fn build_prompt(&self, request: &PromptRequest) -> Result<String, PromptError> {
        let timer = Timer::start();
        let key = fingerprint_parts("request", &request.canonical_json());
        let generation = self.schema_generation.load(Ordering::SeqCst);

        let result = match self.cache.get_by_key(&key) {
            Some(text) => Ok(text),
            None => self.assemble(request).map(|text| {
                self.cache_if_current(generation, key, text.clone());
                text
            }),
        };

        self.record("build_prompt", &timer, &result);
        result
    }

    fn assemble(&self, request: &PromptRequest) -> Result<String, PromptError> {
        let mut sections = Vec::with_capacity(request.templates.len() + request.context.len());
        for call in &request.templates {
            sections.push(Section::new(self.fill_template(&call.id, &call.params)?));
        }
        for path in &request.context {
            sections.push(Section::titled(path.as_str(), self.load_context(path)?));
        }
        self.composer
            .compose(&CompositionRequest::new(sections, request.strategy))
    }

    /// Assemble a template and hand the prompt to a provider.
    ///
    /// # Errors
    ///
    /// Any error from [`fill_template`](Self::fill_template), or
    /// [`PromptError::Provider`] if the provider fails.
    pub async fn generate(
        &self,
        provider: &dyn LlmProvider,
        id: &str,
        params: &ParameterSet,
    ) -> Result<String, PromptError> {
        let prompt = self.fill_template(id, params)?;
        let timer = Timer::start();
        let result = provider.complete(&prompt).await.map_err(PromptError::from);
        if let Err(e) = &result {
            tracing::error!(template = %id, error = %e, "Provider call failed");
        }
        self.record("generate", &timer, &result);
        result
    }

    /// Sanitize and score free text against the configured rules.
    #[must_use]
    pub fn analyze(&self, text: &str) -> DetectionResult {
        self.pipeline.detect(text)
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached prompt.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Prompt cache cleared");
    }

    /// Drop the cached prompt for one template call. Returns true if one
    /// existed.
    pub fn invalidate(&self, id: &str, params: &ParameterSet) -> bool {
        self.cache.invalidate(id, params)
    }

    fn record<T>(&self, operation: &str, timer: &Timer, result: &Result<T, PromptError>) {
        let status = match result {
            Ok(_) => "success",
            Err(e) => e.kind().as_str(),
        };
        self.metrics.increment_counter(
            OPERATIONS_TOTAL,
            &[("operation", operation), ("status", status)],
        );
        self.metrics.observe_histogram(
            OPERATION_DURATION_SECONDS,
            &[("operation", operation)],
            timer.elapsed_secs(),
        );
    }
}
