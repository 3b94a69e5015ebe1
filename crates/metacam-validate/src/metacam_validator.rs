//! L10 — MetaCam Validator: schema + file-presence + size-range +
//! duration + point-cloud + device checks (spec §4.10, §3 layout
//! invariants).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use metacam_types::{Issue, MetadataMap, MetadataValue, ValidationLevel, ValidationResult};
use serde_json::json;

use crate::framework::{BaseValidator, ScoreAccumulator};
use crate::metadata_probe::{self, classify_duration, device_id, DurationStatus};
use crate::pcd;

/// Root directories the MetaCam layout requires (spec §3).
const REQUIRED_DIRS: &[&str] = &["images", "data", "info"];

/// Root files with their size range in bytes (spec §3).
const REQUIRED_ROOT_FILES: &[(&str, u64, u64)] = &[
    ("colorized-realtime.las", 1024 * 1024, 1024 * 1024 * 1024),
    ("metadata.yaml", 100, 10 * 1024),
    ("Preview.jpg", 1024, 10 * 1024 * 1024),
    ("Preview.pcd", 1024, 100 * 1024 * 1024),
];

const REQUIRED_INFO_FILES: &[&str] = &["calibration.json", "device_info.json", "rtk_info.json"];

const DATA_FILE_CANDIDATES: &[&str] = &["data/data_0", "data/data_0.bag"];
const DATA_FILE_MIN: u64 = 1024 * 1024;
const DATA_FILE_MAX: u64 = 2 * 1024 * 1024 * 1024;

pub struct MetaCamValidator;

impl MetaCamValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MetaCamValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseValidator for MetaCamValidator {
    fn supported_formats(&self) -> HashSet<&'static str> {
        HashSet::from(["metacam"])
    }

    fn name(&self) -> &'static str {
        "MetaCamValidator"
    }

    async fn validate(&self, root: &Path, level: ValidationLevel) -> ValidationResult {
        validate_root(root, level)
    }
}

/// Accumulates issues and score across the ordered checks in spec §4.10
/// before a single `ValidationResult` is built at the end.
#[derive(Default)]
struct Findings {
    errors: Vec<Issue>,
    critical: Vec<Issue>,
    warnings: Vec<Issue>,
}

impl Findings {
    fn error(&mut self, issue: Issue) {
        self.errors.push(issue);
    }

    /// For checks the spec marks fatal regardless of validation level
    /// (duration out of range, point-cloud scale out of range): these
    /// must force `is_valid = false` even at STANDARD, where plain
    /// errors are otherwise tolerated (spec §4.9, scenario 2).
    fn critical(&mut self, issue: Issue) {
        self.critical.push(issue);
    }

    fn warning(&mut self, issue: Issue) {
        self.warnings.push(issue);
    }
}

fn validate_root(root: &Path, level: ValidationLevel) -> ValidationResult {
    let mut score = ScoreAccumulator::new();
    let mut findings = Findings::default();
    let mut metadata = MetadataMap::new();

    // --- structure: required directories ---
    for dir in REQUIRED_DIRS {
        if !root.join(dir).is_dir() {
            score.missing_required_file();
            findings.error(
                Issue::new("MISSING_DIRECTORY", format!("required directory '{dir}' is missing"))
                    .with_path(dir.to_string()),
            );
        }
    }

    // --- required files with size ranges ---
    for (name, min, max) in REQUIRED_ROOT_FILES {
        check_sized_file(root, name, *min, *max, &mut score, &mut findings);
    }

    // --- data_0 / data_0.bag, exactly one required ---
    let data_candidate = DATA_FILE_CANDIDATES
        .iter()
        .find(|candidate| root.join(candidate).is_file());
    match data_candidate {
        Some(candidate) => {
            check_sized_file(root, candidate, DATA_FILE_MIN, DATA_FILE_MAX, &mut score, &mut findings);
        }
        None => {
            score.missing_required_file();
            findings.error(Issue::new(
                "MISSING_DATA_FILE",
                "neither data/data_0 nor data/data_0.bag is present",
            ));
        }
    }

    // --- info/ required files ---
    for name in REQUIRED_INFO_FILES {
        let path = format!("info/{name}");
        if !root.join(&path).is_file() {
            score.missing_optional_file();
            findings.warning(
                Issue::new("MISSING_INFO_FILE", format!("'{path}' is missing")).with_path(path),
            );
        }
    }

    // --- content parse: metadata.yaml ---
    let metadata_path = root.join("metadata.yaml");
    match metadata_probe::probe(&metadata_path) {
        Ok(extracted) => {
            let duration_status = extracted
                .duration_seconds
                .map(classify_duration)
                .unwrap_or(DurationStatus::Unknown);

            if duration_status.is_fatal() {
                score.content_parse_failure();
                findings.critical(Issue::new(
                    match duration_status {
                        DurationStatus::ErrorTooShort => "DURATION_TOO_SHORT",
                        DurationStatus::ErrorTooLong => "DURATION_TOO_LONG",
                        _ => "DURATION_INVALID",
                    },
                    format!(
                        "recording duration classified as {}",
                        duration_status.as_str()
                    ),
                ));
            } else if matches!(
                duration_status,
                DurationStatus::WarningShort | DurationStatus::WarningLong
            ) {
                score.warning();
                findings.warning(Issue::new(
                    "DURATION_MARGINAL",
                    format!("recording duration classified as {}", duration_status.as_str()),
                ));
            }

            let id = device_id(extracted.device_model.as_deref(), extracted.device_sn.as_deref());
            if id.is_none() {
                score.warning();
                findings.warning(Issue::new(
                    "DEVICE_ID_ABSENT",
                    "device model/serial not both present; device id cannot be constructed",
                ));
            }

            metadata.insert(
                "extracted_metadata",
                MetadataValue::json(json!({
                    "start_time": extracted.start_time,
                    "duration_seconds": extracted.duration_seconds,
                    "duration_status": duration_status.as_str(),
                    "location": { "lat": extracted.lat, "lon": extracted.lon },
                    "device": {
                        "model": extracted.device_model,
                        "sn": extracted.device_sn,
                        "id": id,
                    },
                })),
            );
        }
        Err(reason) => {
            score.content_parse_failure();
            findings.error(Issue::new(
                "METADATA_PARSE_FAILED",
                format!("failed to parse metadata.yaml: {reason}"),
            ));
        }
    }

    // --- point-cloud scale ---
    let pcd_path = root.join("Preview.pcd");
    let scale = pcd::probe(&pcd_path);
    if scale.status.is_fatal() {
        score.content_parse_failure();
        findings.critical(Issue::new(
            "PCD_SCALE_OUT_OF_RANGE",
            format!("point cloud scale classified as {}", scale.status.as_str()),
        ));
    } else if !matches!(scale.status, pcd::ScaleStatus::Optimal) {
        score.warning();
        findings.warning(Issue::new(
            "PCD_SCALE_MARGINAL",
            format!("point cloud scale classified as {}", scale.status.as_str()),
        ));
    }
    metadata.insert(
        "pcd_scale",
        MetadataValue::json(json!({
            "status": scale.status.as_str(),
            "width_m": scale.width_m,
            "height_m": scale.height_m,
            "depth_m": scale.depth_m,
            "area_sqm": scale.area_sqm,
            "points_parsed": scale.points_parsed,
        })),
    );

    let final_score = score.finish();
    let summary = format!("MetaCam package at {} scored {:.1}", root.display(), final_score);

    let mut builder = ValidationResult::builder("MetaCamValidator")
        .score(final_score)
        .summary(summary)
        .metadata(metadata);
    for error in findings.errors {
        builder = builder.error(error);
    }
    for critical in findings.critical {
        builder = builder.critical_error(critical);
    }
    for warning in findings.warnings {
        builder = builder.warning(warning);
    }
    builder.build(level)
}

fn check_sized_file(
    root: &Path,
    relative: &str,
    min: u64,
    max: u64,
    score: &mut ScoreAccumulator,
    findings: &mut Findings,
) {
    let path: PathBuf = root.join(relative);
    match std::fs::metadata(&path) {
        Ok(meta) => {
            let size = meta.len();
            if size < min || size > max {
                score.size_range_breach();
                findings.error(
                    Issue::new(
                        "FILE_SIZE_OUT_OF_RANGE",
                        format!("'{relative}' is {size} bytes, outside [{min}, {max}]"),
                    )
                    .with_path(relative.to_string()),
                );
            }
        }
        Err(_) => {
            score.missing_required_file();
            findings.error(
                Issue::new("MISSING_REQUIRED_FILE", format!("'{relative}' is missing"))
                    .with_path(relative.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_layout(root: &Path) {
        fs::create_dir_all(root.join("images")).unwrap();
        fs::create_dir_all(root.join("data")).unwrap();
        fs::create_dir_all(root.join("info")).unwrap();
        fs::write(
            root.join("colorized-realtime.las"),
            vec![0u8; 2 * 1024 * 1024],
        )
        .unwrap();
        fs::write(
            root.join("metadata.yaml"),
            "record:\n  start_time: t0\n  duration: 330\n  location:\n    lat: 1.0\n    lon: 2.0\n",
        )
        .unwrap();
        fs::write(root.join("Preview.jpg"), vec![0u8; 2048]).unwrap();
        fs::write(root.join("Preview.pcd"), sample_pcd()).unwrap();
        fs::write(root.join("data/data_0"), vec![0u8; 2 * 1024 * 1024]).unwrap();
        fs::write(root.join("info/calibration.json"), "{}").unwrap();
        fs::write(root.join("info/device_info.json"), "{}").unwrap();
        fs::write(root.join("info/rtk_info.json"), "{}").unwrap();
    }

    fn sample_pcd() -> Vec<u8> {
        format!(
            "# .PCD v0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 2\nHEIGHT 1\nPOINTS 2\nDATA ascii\n-50 -40 0\n50 40 5\n"
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn valid_layout_passes_at_standard_level() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path());
        let validator = MetaCamValidator::new();
        let result = validator.validate(dir.path(), ValidationLevel::Standard).await;
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.score >= 60.0);
    }

    #[tokio::test]
    async fn duration_too_short_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path());
        fs::write(
            dir.path().join("metadata.yaml"),
            "record:\n  start_time: t0\n  duration: 150\n",
        )
        .unwrap();
        let validator = MetaCamValidator::new();
        let result = validator.validate(dir.path(), ValidationLevel::Standard).await;
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.code == "DURATION_TOO_SHORT"));
    }

    #[tokio::test]
    async fn missing_directory_is_scored_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let validator = MetaCamValidator::new();
        let result = validator.validate(dir.path(), ValidationLevel::Lenient).await;
        assert!(result.score < 100.0);
        assert!(result.errors.iter().any(|e| e.code == "MISSING_DIRECTORY"));
    }
}
