//! L9 — Validator framework: the `BaseValidator` contract every
//! validator in the registry implements (spec §4.9, §4.12 "new
//! validators implement BaseValidator and are added to a registry").

use std::collections::HashSet;

use async_trait::async_trait;
use metacam_types::{ValidationLevel, ValidationResult};

/// Implemented by every validator the Validation Manager (L12) can
/// dispatch to. Grounded the way the corpus's `EcosystemParser`/
/// `PackageFormat` traits key a registry by a format identifier: each
/// validator declares the format strings it handles, and the manager
/// looks one up by format hint or auto-detection.
#[async_trait]
pub trait BaseValidator: Send + Sync {
    fn supported_formats(&self) -> HashSet<&'static str>;

    async fn validate(&self, root_path: &std::path::Path, level: ValidationLevel) -> ValidationResult;

    fn name(&self) -> &'static str;
}

/// Scoring helper shared by validators (spec §4.9): start at 100, then
/// subtract per-issue penalties, floored at 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreAccumulator {
    score: f64,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self { score: 100.0 }
    }

    pub fn missing_required_file(&mut self) -> &mut Self {
        self.score -= 20.0;
        self
    }

    pub fn size_range_breach(&mut self) -> &mut Self {
        self.score -= 10.0;
        self
    }

    pub fn content_parse_failure(&mut self) -> &mut Self {
        self.score -= 10.0;
        self
    }

    pub fn missing_optional_file(&mut self) -> &mut Self {
        self.score -= 5.0;
        self
    }

    pub fn warning(&mut self) -> &mut Self {
        self.score -= 2.0;
        self
    }

    pub fn finish(&self) -> f64 {
        self.score.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_floors_at_zero() {
        let mut acc = ScoreAccumulator::new();
        for _ in 0..10 {
            acc.missing_required_file();
        }
        assert_eq!(acc.finish(), 0.0);
    }

    #[test]
    fn penalties_compose() {
        let mut acc = ScoreAccumulator::new();
        acc.missing_optional_file().warning();
        assert_eq!(acc.finish(), 93.0);
    }
}
