//! `ValidationResult` and `PipelineResult` (spec §3, §4.9, §8 invariants).

use serde::{Deserialize, Serialize};

use crate::MetadataMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationLevel {
    Strict,
    Standard,
    Lenient,
}

impl ValidationLevel {
    /// Minimum score required to pass at this level (spec §4.9).
    pub fn min_score(self) -> f64 {
        match self {
            ValidationLevel::Strict => 90.0,
            ValidationLevel::Standard => 60.0,
            ValidationLevel::Lenient => 30.0,
        }
    }

    /// Max number of non-critical errors tolerated at this level.
    pub fn max_non_critical_errors(self) -> usize {
        match self {
            ValidationLevel::Strict => 0,
            ValidationLevel::Standard => usize::MAX,
            ValidationLevel::Lenient => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueSeverity {
    Critical,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: String,
    pub message: String,
    pub path: Option<String>,
}

impl Issue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// The single value exchanged between validators and consumers (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub score: f64,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub summary: String,
    pub validator_type: String,
    pub metadata: MetadataMap,
    /// Severities paired index-for-index with `errors`; kept separate so
    /// `errors`/`warnings` stay plain `Issue` lists as spec §3 describes,
    /// while still letting the framework ask "is there a critical error".
    critical_error_codes: Vec<String>,
}

impl ValidationResult {
    pub fn builder(validator_type: impl Into<String>) -> ValidationResultBuilder {
        ValidationResultBuilder::new(validator_type)
    }

    pub fn has_critical_error(&self) -> bool {
        !self.critical_error_codes.is_empty()
    }

    /// Clamps the invariants from spec §3/§8: score in [0,100] and never
    /// NaN, summary at most 240 chars, no duplicate errors/warnings.
    fn normalize(mut self) -> Self {
        if self.score.is_nan() {
            self.score = 0.0;
        }
        self.score = self.score.clamp(0.0, 100.0);
        if self.summary.len() > 240 {
            self.summary.truncate(240);
        }
        dedup_issues(&mut self.errors);
        dedup_issues(&mut self.warnings);
        self
    }
}

fn dedup_issues(issues: &mut Vec<Issue>) {
    let mut seen = std::collections::HashSet::new();
    issues.retain(|issue| seen.insert((issue.code.clone(), issue.path.clone())));
}

pub struct ValidationResultBuilder {
    validator_type: String,
    score: f64,
    errors: Vec<Issue>,
    warnings: Vec<Issue>,
    critical_error_codes: Vec<String>,
    summary: String,
    metadata: MetadataMap,
}

impl ValidationResultBuilder {
    fn new(validator_type: impl Into<String>) -> Self {
        Self {
            validator_type: validator_type.into(),
            score: 100.0,
            errors: Vec::new(),
            warnings: Vec::new(),
            critical_error_codes: Vec::new(),
            summary: String::new(),
            metadata: MetadataMap::new(),
        }
    }

    pub fn score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn error(mut self, issue: Issue) -> Self {
        self.errors.push(issue);
        self
    }

    pub fn critical_error(mut self, issue: Issue) -> Self {
        self.critical_error_codes.push(issue.code.clone());
        self.errors.push(issue);
        self
    }

    pub fn warning(mut self, issue: Issue) -> Self {
        self.warnings.push(issue);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self, level: ValidationLevel) -> ValidationResult {
        let has_critical = !self.critical_error_codes.is_empty();
        let non_critical_errors = self
            .errors
            .iter()
            .filter(|e| !self.critical_error_codes.contains(&e.code))
            .count();
        let is_valid = !has_critical
            && self.score >= level.min_score()
            && non_critical_errors <= level.max_non_critical_errors();

        ValidationResult {
            is_valid,
            score: self.score,
            errors: self.errors,
            warnings: self.warnings,
            summary: self.summary,
            validator_type: self.validator_type,
            metadata: self.metadata,
            critical_error_codes: self.critical_error_codes,
        }
        .normalize()
    }
}

/// Produced by the Validation Manager (L12) when both the MetaCam and
/// Transient validators ran (spec §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub combined_score: f64,
    pub is_valid: bool,
    pub metadata: MetadataMap,
    pub validator_type: String,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl PipelineResult {
    /// `combined_score = round(0.7*basic.score + 0.3*transient.score, 2)`
    /// and `is_valid = basic.is_valid` (spec §4.12, §8).
    pub fn combine(mut basic: ValidationResult, transient: ValidationResult) -> Self {
        let combined_score = ((0.7 * basic.score + 0.3 * transient.score) * 100.0).round() / 100.0;
        let is_valid = basic.is_valid;

        basic.metadata.merge_additive(transient.metadata);

        let mut errors = basic.errors;
        errors.extend(transient.errors);
        dedup_issues(&mut errors);

        let mut warnings = basic.warnings;
        warnings.extend(transient.warnings);
        dedup_issues(&mut warnings);

        PipelineResult {
            combined_score,
            is_valid,
            metadata: basic.metadata,
            validator_type: "Pipeline(MetaCam+Transient)".to_string(),
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_never_nan_and_clamped() {
        let result = ValidationResult::builder("t")
            .score(f64::NAN)
            .build(ValidationLevel::Lenient);
        assert_eq!(result.score, 0.0);

        let result = ValidationResult::builder("t")
            .score(150.0)
            .build(ValidationLevel::Lenient);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn critical_error_forces_invalid() {
        let result = ValidationResult::builder("t")
            .score(95.0)
            .critical_error(Issue::new("E_CRIT", "boom"))
            .build(ValidationLevel::Strict);
        assert!(!result.is_valid);
        assert!(result.has_critical_error());
    }

    #[test]
    fn combined_score_matches_weighting() {
        let basic = ValidationResult::builder("basic")
            .score(80.0)
            .build(ValidationLevel::Standard);
        let transient = ValidationResult::builder("transient")
            .score(60.0)
            .build(ValidationLevel::Standard);
        let pipeline = PipelineResult::combine(basic, transient);
        assert_eq!(pipeline.combined_score, 74.00);
    }

    #[test]
    fn duplicate_issues_are_deduplicated() {
        let result = ValidationResult::builder("t")
            .score(50.0)
            .error(Issue::new("E1", "dup"))
            .error(Issue::new("E1", "dup"))
            .build(ValidationLevel::Lenient);
        assert_eq!(result.errors.len(), 1);
    }
}
