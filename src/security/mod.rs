//! Input security pipeline.
//!
//! Every caller-supplied value passes four stages before it may enter a
//! template:
//!
//! 1. [`Validator`]: length, control characters, schema types
//! 2. [`Sanitizer`]: normalisation and blocklist removal
//! 3. [`InjectionDetector`]: weighted risk scoring
//! 4. [`Escaper`]: structural delimiters around the value
//!
//! [`SecurityPipeline`] runs them in order and enforces strict or permissive
//! mode.

mod detector;
mod escaper;
mod history;
mod pipeline;
mod sanitizer;
mod validator;

pub use detector::{
    DetectionResult, InjectionDetector, PatternDetector, PatternLibrary, PatternRule,
    RiskAggregation, RiskLevel, RuleCategory, Signal, NESTED_DELIMITER_WEIGHT,
    NO_SIGNAL_CONFIDENCE,
};
pub use escaper::{Escaper, ESCAPE_END, ESCAPE_START};
pub use history::{
    FieldLengthHistory, LENGTH_ANOMALY_FACTOR, LENGTH_ANOMALY_FLOOR, LENGTH_ANOMALY_WEIGHT,
    LENGTH_HISTORY_MIN_SAMPLES,
};
pub use pipeline::{
    FieldReport, SecuredParameters, SecurityConfig, SecurityPipeline, SecurityReport,
};
pub use sanitizer::{Blocklist, BlocklistEntry, BlocklistHit, Sanitized, Sanitizer};
pub use validator::{is_forbidden_control, ValidationResult, Validator};

#[cfg(test)]
pub use detector::MockInjectionDetector;
