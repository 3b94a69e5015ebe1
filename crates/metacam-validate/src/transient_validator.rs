//! L11 — Transient Validator: wraps the Object Detector Facade (L7) and
//! Transient Metrics Engine (L8) over a package's camera subdirectories;
//! runs only if a camera folder exists (spec §4.11).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use metacam_types::{Issue, MetadataMap, MetadataValue, ValidationLevel, ValidationResult};
use serde_json::json;
use tracing::warn;
use walkdir::WalkDir;

use crate::detector::{DetectorConfig, Frame, ObjectDetectorFacade};
use crate::framework::BaseValidator;
use crate::metrics::{ScenePreset, TransientMetricsEngine};
use crate::region_weight::RegionWeightMap;
use crate::sampler;

const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
const MAX_CAMERA_SEARCH_DEPTH: usize = 2;

/// Locates a `camera/left` or `camera/right` directory within the
/// extracted root or up to two subtree levels deep, containing at least
/// one supported image (spec §4.11).
pub fn find_camera_dir(root: &Path) -> Option<PathBuf> {
    for entry in WalkDir::new(root)
        .min_depth(0)
        .max_depth(MAX_CAMERA_SEARCH_DEPTH + 2)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name != "left" && name != "right" {
            continue;
        }
        if entry.path().parent().map(|p| p.file_name()) != Some(Some(std::ffi::OsStr::new("camera")))
        {
            continue;
        }
        if has_supported_image(entry.path()) {
            return Some(entry.path().to_path_buf());
        }
    }
    None
}

fn has_supported_image(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .any(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
}

fn ordered_image_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|ext| SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

pub struct TransientValidator {
    detector_config: DetectorConfig,
    scene_preset: ScenePreset,
}

impl TransientValidator {
    pub fn new(detector_config: DetectorConfig, scene_preset: ScenePreset) -> Self {
        Self {
            detector_config,
            scene_preset,
        }
    }
}

#[async_trait]
impl BaseValidator for TransientValidator {
    fn supported_formats(&self) -> HashSet<&'static str> {
        HashSet::from(["metacam"])
    }

    fn name(&self) -> &'static str {
        "TransientValidator"
    }

    async fn validate(&self, root: &Path, level: ValidationLevel) -> ValidationResult {
        let Some(camera_dir) = find_camera_dir(root) else {
            // Caller (Validation Manager) only invokes us when a camera
            // folder exists; this is a defensive fallback.
            return ValidationResult::builder("TransientValidator")
                .score(100.0)
                .summary("no camera directory present; transient assessment skipped")
                .build(level);
        };

        let facade = match ObjectDetectorFacade::load(self.detector_config.clone()) {
            Ok(facade) => facade,
            Err(err) => {
                warn!(error = %err, "object detector facade failed to initialize");
                return ValidationResult::builder("TransientValidator")
                    .score(0.0)
                    .critical_error(Issue::new(
                        "DETECTOR_INIT_FAILED",
                        format!("object detector facade failed to initialize: {err}"),
                    ))
                    .summary("transient assessment unavailable: detector failed to load")
                    .build(level);
            }
        };

        let images = ordered_image_paths(&camera_dir);
        let plan = sampler::plan(images.len() as u64);

        let mut engine =
            TransientMetricsEngine::new(RegionWeightMap::new(), self.scene_preset, images.len() as u64);

        'outer: for (batch_index, batch) in images
            .chunks(facade.detection_batch_size())
            .enumerate()
        {
            if batch_index as u64 % plan.detection_stride as u64 != 0 {
                continue;
            }
            let frames: Vec<Frame> = batch.iter().filter_map(|p| load_frame(p)).collect();
            if frames.is_empty() {
                continue;
            }

            let frame_count = frames.len() as u64;
            if batch_index as u64 % plan.segmentation_stride as u64 == 0 {
                match facade.segment(&frames) {
                    Ok(segmentations) => {
                        if engine.push_segmentations(&segmentations, frame_count) {
                            break 'outer;
                        }
                    }
                    Err(err) => warn!(error = %err, "segmentation batch failed"),
                }
            } else {
                match facade.detect(&frames) {
                    Ok(detections) => {
                        if engine.push_detections(&detections, frame_count) {
                            break 'outer;
                        }
                    }
                    Err(err) => warn!(error = %err, "detection batch failed"),
                }
            }
        }

        let assessment = engine.finish(plan.detection_stride, plan.segmentation_stride);

        let mut metadata = MetadataMap::new();
        metadata.insert(
            "transient_validation",
            MetadataValue::json(json!({
                "specific_data": {
                    "decision": assessment.decision.as_str(),
                    "metrics": {
                        "WDD": assessment.metrics.wdd,
                        "WPO": assessment.metrics.wpo,
                        "SAI": assessment.metrics.sai,
                    },
                    "details": {
                        "frames_sampled": assessment.frames_sampled,
                        "frames_total": assessment.frames_total,
                        "sampling_rate_detection": assessment.sampling_rate_detection,
                        "sampling_rate_segmentation": assessment.sampling_rate_segmentation,
                        "early_terminated": assessment.early_terminated,
                        "degraded_detector": facade.is_degraded(),
                    },
                },
            })),
        );

        let score = match assessment.decision {
            metacam_types::TransientDecision::Pass => 100.0,
            metacam_types::TransientDecision::NeedReview => 60.0,
            metacam_types::TransientDecision::Reject => 0.0,
        };

        let mut builder = ValidationResult::builder("TransientValidator")
            .score(score)
            .summary(format!(
                "transient assessment: {} (WDD {:.2}, WPO {:.2}%, SAI {:.2}%)",
                assessment.decision.as_str(),
                assessment.metrics.wdd,
                assessment.metrics.wpo,
                assessment.metrics.sai
            ))
            .metadata(metadata);

        if assessment.decision == metacam_types::TransientDecision::Reject {
            builder = builder.error(Issue::new(
                "TRANSIENT_REJECTED",
                "transient-obstacle assessment rejected this package",
            ));
        }

        builder.build(level)
    }
}

fn load_frame(path: &Path) -> Option<Frame> {
    let image = image::open(path).ok()?.to_rgb8();
    let (width, height) = image.dimensions();
    Some(Frame {
        width,
        height,
        rgb: image.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_camera_left_with_images() {
        let dir = tempfile::tempdir().unwrap();
        let left = dir.path().join("camera/left");
        std::fs::create_dir_all(&left).unwrap();
        std::fs::write(left.join("0001.jpg"), b"not a real jpg").unwrap();

        let found = find_camera_dir(dir.path());
        assert_eq!(found, Some(left));
    }

    #[test]
    fn returns_none_without_camera_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_camera_dir(dir.path()), None);
    }
}
