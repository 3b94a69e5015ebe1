//! L8 — Transient Metrics Engine: computes WDD/WPO/SAI from per-frame
//! detections and segmentations, renders a PASS/NEED_REVIEW/REJECT
//! decision with early-termination short-circuits (spec §4.8, scenario 5).

use metacam_types::{TransientAssessment, TransientDecision, TransientMetrics};

use crate::detector::{Detection, SegmentedDetection};
use crate::region_weight::RegionWeightMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenePreset {
    Indoor,
    Outdoor,
    Default,
}

/// One metric's four-way decision band (spec §4.8 table).
#[derive(Debug, Clone, Copy)]
struct Band {
    optimal_max: f64,
    acceptable_max: f64,
    reject_min: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bands {
    wdd: Band,
    wpo: Band,
    sai: Band,
}

const DEFAULT_BANDS: Bands = Bands {
    wdd: Band {
        optimal_max: 1.0,
        acceptable_max: 1.5,
        reject_min: 8.0,
    },
    wpo: Band {
        optimal_max: 1.0,
        acceptable_max: 5.0,
        reject_min: 30.0,
    },
    sai: Band {
        optimal_max: 5.0,
        acceptable_max: 15.0,
        reject_min: 25.0,
    },
};

/// Indoor tightens thresholds by ~20%, outdoor loosens by ~20% (spec
/// §4.8, §9 open question — the multiplier itself is this
/// implementation's explicit choice, not reconstructed from the
/// original).
fn bands_for(preset: ScenePreset) -> Bands {
    match preset {
        ScenePreset::Default => DEFAULT_BANDS,
        ScenePreset::Indoor => scale_bands(DEFAULT_BANDS, 0.8),
        ScenePreset::Outdoor => scale_bands(DEFAULT_BANDS, 1.2),
    }
}

fn scale_bands(bands: Bands, factor: f64) -> Bands {
    let scale = |b: Band| Band {
        optimal_max: b.optimal_max * factor,
        acceptable_max: b.acceptable_max * factor,
        reject_min: b.reject_min * factor,
    };
    Bands {
        wdd: scale(bands.wdd),
        wpo: scale(bands.wpo),
        sai: scale(bands.sai),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricBand {
    Optimal,
    Acceptable,
    Review,
    Reject,
}

fn classify_metric(value: f64, band: Band) -> MetricBand {
    if value >= band.reject_min {
        MetricBand::Reject
    } else if value > band.acceptable_max {
        // Covers both the explicit review band and the gap up to
        // reject_min; reject is a floor, not an upper-bounded range.
        MetricBand::Review
    } else if value > band.optimal_max {
        MetricBand::Acceptable
    } else {
        MetricBand::Optimal
    }
}

/// Early-termination thresholds (spec §4.8): running values past these
/// let the engine stop sampling and return REJECT immediately.
const EARLY_TERM_WDD: f64 = 12.0;
const EARLY_TERM_WPO: f64 = 40.0;
const EARLY_TERM_SAI: f64 = 35.0;

/// Running accumulator fed one sampled batch's detections/segmentations
/// at a time, so callers can stream sampling and stop early without
/// buffering every frame's output.
pub struct TransientMetricsEngine {
    weights: RegionWeightMap,
    preset: ScenePreset,
    wdd_sum: f64,
    wpo_sum: f64,
    person_lower_band_frames: u64,
    frames_detected: u64,
    frames_segmented: u64,
    frames_total: u64,
    early_terminated: bool,
}

impl TransientMetricsEngine {
    pub fn new(weights: RegionWeightMap, preset: ScenePreset, frames_total: u64) -> Self {
        Self {
            weights,
            preset,
            wdd_sum: 0.0,
            wpo_sum: 0.0,
            person_lower_band_frames: 0,
            frames_detected: 0,
            frames_segmented: 0,
            frames_total,
            early_terminated: false,
        }
    }

    /// Feeds one sampled batch's detection output, spanning
    /// `frame_count` source frames (spec §4.8 WDD term — the facade
    /// returns a flat per-batch detection list rather than one list per
    /// frame, so the caller reports how many frames the batch actually
    /// covered). Returns `true` if early termination fired and the
    /// caller should stop sampling further frames.
    pub fn push_detections(&mut self, detections: &[Detection], frame_count: u64) -> bool {
        self.frames_detected += frame_count;
        for detection in detections {
            let (u, v) = detection.bbox.center_uv();
            self.wdd_sum += self.weights.weight_at(u, v);
        }
        self.check_early_termination()
    }

    /// Feeds one sampled batch's segmentation output, spanning
    /// `frame_count` source frames (spec §4.8 WPO/SAI terms). A frame
    /// qualifies for SAI if it has a person whose mask/bbox sits in the
    /// lower band (v > 0.5) and covers > 5% of the frame area; since the
    /// facade doesn't group its output per frame, qualifying detections
    /// are counted toward the SAI numerator and capped at `frame_count`
    /// so a batch can never contribute more "self appearance" frames
    /// than it actually contained.
    pub fn push_segmentations(&mut self, segmentations: &[SegmentedDetection], frame_count: u64) -> bool {
        self.frames_segmented += frame_count;
        let mut self_appearances_in_batch: u64 = 0;

        for seg in segmentations {
            if let Some(mask) = &seg.mask {
                let (u, v) = mask.center_uv;
                self.wpo_sum += self.weights.weight_at(u, v) * mask.area_fraction as f64;

                if seg.detection.class == crate::detector::CLASS_PERSON
                    && v > 0.5
                    && mask.area_fraction > 0.05
                {
                    self_appearances_in_batch += 1;
                }
            }
        }

        self.person_lower_band_frames += self_appearances_in_batch.min(frame_count.max(1));

        self.check_early_termination()
    }

    fn running_metrics(&self) -> TransientMetrics {
        let wdd = if self.frames_detected == 0 {
            0.0
        } else {
            self.wdd_sum / self.frames_detected as f64
        };
        let wpo = if self.frames_segmented == 0 {
            0.0
        } else {
            100.0 * self.wpo_sum / self.frames_segmented as f64
        };
        let sai = if self.frames_segmented == 0 {
            0.0
        } else {
            100.0 * self.person_lower_band_frames as f64 / self.frames_segmented as f64
        };
        TransientMetrics { wdd, wpo, sai }
    }

    fn check_early_termination(&mut self) -> bool {
        if self.early_terminated {
            return true;
        }
        let metrics = self.running_metrics();
        if metrics.wdd > EARLY_TERM_WDD
            || metrics.wpo > EARLY_TERM_WPO
            || metrics.sai > EARLY_TERM_SAI
        {
            self.early_terminated = true;
        }
        self.early_terminated
    }

    /// Renders the final verdict (spec §4.8 decision rule).
    pub fn finish(self, sampling_rate_detection: u32, sampling_rate_segmentation: u32) -> TransientAssessment {
        let metrics = self.running_metrics();
        let decision = if self.early_terminated {
            TransientDecision::Reject
        } else {
            decide(metrics, self.preset)
        };

        TransientAssessment {
            decision,
            metrics,
            frames_sampled: self.frames_detected.max(self.frames_segmented),
            frames_total: self.frames_total,
            sampling_rate_detection,
            sampling_rate_segmentation,
            early_terminated: self.early_terminated,
        }
    }
}

/// `REJECT` if any metric is in reject; else `NEED_REVIEW` if any metric
/// is in review (or acceptable, since acceptable sits strictly between
/// optimal and review and the spec's decision rule only names
/// optimal/PASS vs review/REJECT bands); else `PASS`.
fn decide(metrics: TransientMetrics, preset: ScenePreset) -> TransientDecision {
    let bands = bands_for(preset);
    let wdd_band = classify_metric(metrics.wdd, bands.wdd);
    let wpo_band = classify_metric(metrics.wpo, bands.wpo);
    let sai_band = classify_metric(metrics.sai, bands.sai);

    if [wdd_band, wpo_band, sai_band].contains(&MetricBand::Reject) {
        TransientDecision::Reject
    } else if [wdd_band, wpo_band, sai_band]
        .iter()
        .any(|b| matches!(b, MetricBand::Review | MetricBand::Acceptable))
    {
        TransientDecision::NeedReview
    } else {
        TransientDecision::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{BBox, Detection, Mask, SegmentedDetection};

    fn detection_at(u: f64, v: f64) -> Detection {
        Detection {
            class: crate::detector::CLASS_PERSON,
            confidence: 0.9,
            bbox: BBox {
                x: (u - 0.01) as f32,
                y: (v - 0.01) as f32,
                width: 0.02,
                height: 0.02,
            },
        }
    }

    #[test]
    fn pass_scenario_from_spec() {
        let metrics = TransientMetrics {
            wdd: 0.5,
            wpo: 0.4,
            sai: 2.0,
        };
        assert_eq!(decide(metrics, ScenePreset::Default), TransientDecision::Pass);
    }

    #[test]
    fn need_review_scenario_from_spec() {
        let metrics = TransientMetrics {
            wdd: 1.8,
            wpo: 3.0,
            sai: 4.0,
        };
        assert_eq!(
            decide(metrics, ScenePreset::Default),
            TransientDecision::NeedReview
        );
    }

    #[test]
    fn reject_scenario_from_spec() {
        let metrics = TransientMetrics {
            wdd: 9.0,
            wpo: 1.0,
            sai: 1.0,
        };
        assert_eq!(decide(metrics, ScenePreset::Default), TransientDecision::Reject);
    }

    #[test]
    fn monotonicity_never_improves_on_larger_metrics() {
        let base = TransientMetrics {
            wdd: 0.5,
            wpo: 0.4,
            sai: 2.0,
        };
        let worse = TransientMetrics {
            wdd: 5.0,
            ..base
        };
        let base_decision = decide(base, ScenePreset::Default);
        let worse_decision = decide(worse, ScenePreset::Default);
        assert!(worse_decision.rank() >= base_decision.rank());
    }

    #[test]
    fn early_termination_short_circuits_to_reject() {
        let mut engine =
            TransientMetricsEngine::new(RegionWeightMap::new(), ScenePreset::Default, 100);
        let hot_detections: Vec<Detection> = (0..50).map(|_| detection_at(0.5, 0.85)).collect();
        let terminated = engine.push_detections(&hot_detections, 1);
        assert!(terminated);
        let assessment = engine.finish(1, 2);
        assert!(assessment.early_terminated);
        assert_eq!(assessment.decision, TransientDecision::Reject);
    }

    #[test]
    fn sai_counts_only_lower_band_person_masks_over_threshold() {
        let mut engine =
            TransientMetricsEngine::new(RegionWeightMap::new(), ScenePreset::Default, 10);
        let segmentations = vec![SegmentedDetection {
            detection: detection_at(0.5, 0.9),
            mask: Some(Mask {
                area_fraction: 0.1,
                center_uv: (0.5, 0.9),
            }),
        }];
        engine.push_segmentations(&segmentations, 1);
        let assessment = engine.finish(1, 1);
        assert!(assessment.metrics.sai > 0.0);
    }
}
