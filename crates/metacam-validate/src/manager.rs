//! L12 — Validation Manager: composes validators, combines scores,
//! selects a validator by format hint (spec §4.12).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use metacam_types::{PipelineResult, ValidationLevel};

use crate::framework::BaseValidator;
use crate::transient_validator::find_camera_dir;

/// Either a single validator's result or the composed pipeline result,
/// mirroring spec §3's `ValidationResult | PipelineResult` union.
pub enum ManagerOutcome {
    Single(metacam_types::ValidationResult),
    Pipeline(PipelineResult),
}

impl ManagerOutcome {
    pub fn is_valid(&self) -> bool {
        match self {
            ManagerOutcome::Single(r) => r.is_valid,
            ManagerOutcome::Pipeline(r) => r.is_valid,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            ManagerOutcome::Single(r) => r.score,
            ManagerOutcome::Pipeline(r) => r.combined_score,
        }
    }

    pub fn metadata(&self) -> &metacam_types::MetadataMap {
        match self {
            ManagerOutcome::Single(r) => &r.metadata,
            ManagerOutcome::Pipeline(r) => &r.metadata,
        }
    }
}

/// Registry keyed by `supported_formats()`, the way the corpus keys a
/// `PackageFormat`/`EcosystemParser` registry by format identifier
/// (spec §4.12 "Registration").
pub struct ValidationManager {
    basic_validators: HashMap<&'static str, Arc<dyn BaseValidator>>,
    transient_validator: Option<Arc<dyn BaseValidator>>,
}

impl ValidationManager {
    pub fn new() -> Self {
        Self {
            basic_validators: HashMap::new(),
            transient_validator: None,
        }
    }

    /// Registers a basic (non-transient) validator under every format it
    /// declares support for.
    pub fn register(&mut self, validator: Arc<dyn BaseValidator>) {
        for format in validator.supported_formats() {
            self.basic_validators.insert(format, validator.clone());
        }
    }

    /// Registers the transient validator, run as a second pass when a
    /// camera directory is present (spec §4.12).
    pub fn register_transient(&mut self, validator: Arc<dyn BaseValidator>) {
        self.transient_validator = Some(validator);
    }

    /// `validate(root, level, format_hint?) -> ValidationResult |
    /// PipelineResult` (spec §4.12).
    pub async fn validate(
        &self,
        root: &Path,
        level: ValidationLevel,
        format_hint: Option<&str>,
    ) -> Result<ManagerOutcome, ManagerError> {
        let format = format_hint.unwrap_or("metacam");
        let basic = self
            .basic_validators
            .get(format)
            .ok_or(ManagerError::NoValidatorForFormat(format.to_string()))?;

        let basic_result = basic.validate(root, level).await;

        let should_run_transient = self.transient_validator.is_some() && find_camera_dir(root).is_some();
        if !should_run_transient {
            return Ok(ManagerOutcome::Single(basic_result));
        }

        let transient_result = self
            .transient_validator
            .as_ref()
            .unwrap()
            .validate(root, level)
            .await;

        Ok(ManagerOutcome::Pipeline(PipelineResult::combine(
            basic_result,
            transient_result,
        )))
    }
}

impl Default for ValidationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no validator registered for format '{0}'")]
    NoValidatorForFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metacam_validator::MetaCamValidator;

    #[tokio::test]
    async fn runs_basic_only_without_camera_dir() {
        let mut manager = ValidationManager::new();
        manager.register(Arc::new(MetaCamValidator::new()));

        let dir = tempfile::tempdir().unwrap();
        let outcome = manager
            .validate(dir.path(), ValidationLevel::Lenient, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ManagerOutcome::Single(_)));
    }

    #[tokio::test]
    async fn unknown_format_hint_is_an_error() {
        let manager = ValidationManager::new();
        let dir = tempfile::tempdir().unwrap();
        let result = manager
            .validate(dir.path(), ValidationLevel::Lenient, Some("unknown"))
            .await;
        assert!(result.is_err());
    }
}
