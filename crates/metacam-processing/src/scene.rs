//! Scene-type selection (spec §4.13): picks the reconstruction CLI's
//! `-s` argument from the validated package's indoor/outdoor detection
//! and point-cloud scale.
//!
//! Indoor/outdoor itself is not a component this spec defines; it is
//! read off the MetaCam Validator's `extracted_metadata` (a GPS fix
//! implies outdoor, its absence implies indoor) and passed in here as
//! a plain bool so this module stays a pure function of its inputs.

use metacam_types::SceneType;

/// `INDOOR_SCALE_THRESHOLD_M` default (spec §6 names the env var; §4.13
/// gives 30 m as the worked threshold).
pub const DEFAULT_INDOOR_SCALE_THRESHOLD_M: f64 = 30.0;

pub fn select_scene_type(
    is_outdoor: bool,
    max_pcd_dimension_m: Option<f64>,
    indoor_scale_threshold_m: f64,
) -> SceneType {
    if is_outdoor {
        return SceneType::Open;
    }
    match max_pcd_dimension_m {
        Some(max_dim) if max_dim < indoor_scale_threshold_m => SceneType::Narrow,
        _ => SceneType::Balance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outdoor_is_always_open() {
        assert_eq!(
            select_scene_type(true, Some(5.0), DEFAULT_INDOOR_SCALE_THRESHOLD_M),
            SceneType::Open
        );
    }

    #[test]
    fn indoor_small_scale_is_narrow() {
        assert_eq!(
            select_scene_type(false, Some(20.0), DEFAULT_INDOOR_SCALE_THRESHOLD_M),
            SceneType::Narrow
        );
    }

    #[test]
    fn indoor_large_scale_is_balance() {
        assert_eq!(
            select_scene_type(false, Some(80.0), DEFAULT_INDOOR_SCALE_THRESHOLD_M),
            SceneType::Balance
        );
    }

    #[test]
    fn indoor_unknown_scale_is_balance() {
        assert_eq!(
            select_scene_type(false, None, DEFAULT_INDOOR_SCALE_THRESHOLD_M),
            SceneType::Balance
        );
    }
}
