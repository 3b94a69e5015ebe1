//! L6 — Sampling Planner: chooses detection/segmentation stride and frame
//! budgets from a total frame count (spec §4.6, scenario 4).

/// Strides and target frame counts for one transient-assessment run.
/// Deterministic in `total_frames`: the same `N` always yields the same
/// plan (spec §8 law "Determinism of sampling").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    pub total_frames: u64,
    pub detection_stride: u32,
    pub segmentation_stride: u32,
    pub detection_frame_budget: u64,
    pub segmentation_frame_budget: u64,
}

const DETECTION_TARGET: u64 = 200;
const SEGMENTATION_TARGET: u64 = 100;

pub fn plan(total_frames: u64) -> SamplingPlan {
    let detection_stride: u32 = if total_frames <= 200 {
        1
    } else if total_frames <= 500 {
        2
    } else if total_frames <= 1000 {
        4
    } else {
        6
    };

    // Segmentation is strictly at-most-as-dense as detection.
    let segmentation_stride = (detection_stride as f64 * 1.5).ceil() as u32;
    let segmentation_stride = segmentation_stride.max(detection_stride);

    let detection_frame_budget = budget(total_frames, detection_stride as u64, DETECTION_TARGET);
    let segmentation_frame_budget = budget(
        total_frames,
        segmentation_stride as u64,
        SEGMENTATION_TARGET,
    );

    SamplingPlan {
        total_frames,
        detection_stride,
        segmentation_stride,
        detection_frame_budget,
        segmentation_frame_budget,
    }
}

fn budget(total_frames: u64, stride: u64, target: u64) -> u64 {
    let stride_capped = if stride == 0 { total_frames } else { total_frames / stride };
    stride_capped.min(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_match_spec_scenarios() {
        assert_eq!(plan(150).detection_stride, 1);
        assert_eq!(plan(400).detection_stride, 2);
        assert_eq!(plan(900).detection_stride, 4);
        assert_eq!(plan(5000).detection_stride, 6);
    }

    #[test]
    fn segmentation_is_never_denser_than_detection() {
        for n in [10, 150, 400, 900, 5000] {
            let p = plan(n);
            assert!(p.segmentation_stride >= p.detection_stride);
        }
    }

    #[test]
    fn deterministic_for_same_input() {
        assert_eq!(plan(777), plan(777));
    }

    #[test]
    fn frame_budgets_are_capped_by_available_frames() {
        let p = plan(50);
        assert!(p.detection_frame_budget <= 50);
        assert!(p.segmentation_frame_budget <= 50);
    }
}
