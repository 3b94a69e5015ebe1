//! L4 — Metadata Probe: parses the structured recording descriptor
//! (`metadata.yaml`) for start-time, duration, lat/lon, device model+serial
//! (spec §4.4, scenarios 1–2).
//!
//! `metadata.yaml` is a small, flat-ish structure; rather than pull in a
//! YAML crate for four scalar fields, this walks `key: value` lines the
//! way the corpus's config loaders (`settings.rs`) walk simple structured
//! text, tracking indentation to resolve dotted paths like
//! `record.location.lat`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractedMetadata {
    pub start_time: Option<String>,
    pub duration_seconds: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub device_model: Option<String>,
    pub device_sn: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationStatus {
    Optimal,
    WarningShort,
    WarningLong,
    ErrorTooShort,
    ErrorTooLong,
    Unknown,
}

impl DurationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DurationStatus::Optimal => "optimal",
            DurationStatus::WarningShort => "warning_short",
            DurationStatus::WarningLong => "warning_long",
            DurationStatus::ErrorTooShort => "error_too_short",
            DurationStatus::ErrorTooLong => "error_too_long",
            DurationStatus::Unknown => "unknown",
        }
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            DurationStatus::ErrorTooShort | DurationStatus::ErrorTooLong
        )
    }
}

/// Duration classification from spec §4.4 and scenarios 1–2: optimal
/// [4.5, 7] min, warning bands on either side, fatal outside [3, 9] min.
pub fn classify_duration(seconds: f64) -> DurationStatus {
    let minutes = seconds / 60.0;
    if minutes < 3.0 {
        DurationStatus::ErrorTooShort
    } else if minutes < 4.5 {
        DurationStatus::WarningShort
    } else if minutes <= 7.0 {
        DurationStatus::Optimal
    } else if minutes <= 9.0 {
        DurationStatus::WarningLong
    } else {
        DurationStatus::ErrorTooLong
    }
}

/// `"{model}-{SN}"` when both are present; otherwise `None` (spec §4.4).
pub fn device_id(model: Option<&str>, sn: Option<&str>) -> Option<String> {
    match (model, sn) {
        (Some(model), Some(sn)) if !model.is_empty() && !sn.is_empty() => {
            Some(format!("{model}-{sn}"))
        }
        _ => None,
    }
}

pub fn probe(path: &Path) -> Result<ExtractedMetadata, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    Ok(parse(&contents))
}

fn parse(contents: &str) -> ExtractedMetadata {
    let flat = flatten_dotted(contents);

    let mut out = ExtractedMetadata::default();
    out.start_time = flat.get("record.start_time").cloned();
    out.duration_seconds = flat
        .get("record.duration")
        .and_then(|v| v.parse::<f64>().ok());
    out.lat = flat
        .get("record.location.lat")
        .and_then(|v| v.parse::<f64>().ok());
    out.lon = flat
        .get("record.location.lon")
        .and_then(|v| v.parse::<f64>().ok());
    out.device_model = flat.get("device.model").cloned();
    out.device_sn = flat.get("device.sn").cloned();
    out
}

/// Minimal indentation-aware `key: value` walker producing dotted paths.
/// Handles the two-space-indent style MetaCam's recording descriptor uses;
/// quoting and block scalars are not supported (out of scope: this probe
/// only reads four scalar fields, not a general YAML document).
fn flatten_dotted(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut stack: Vec<(usize, String)> = Vec::new();

    for raw_line in contents.lines() {
        if raw_line.trim().is_empty() || raw_line.trim_start().starts_with('#') {
            continue;
        }
        let indent = raw_line.len() - raw_line.trim_start().len();
        let line = raw_line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches(|c| c == '"' || c == '\'');
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');

        while let Some(&(top_indent, _)) = stack.last() {
            if top_indent >= indent {
                stack.pop();
            } else {
                break;
            }
        }

        let path = if let Some((_, parent)) = stack.last() {
            format!("{parent}.{key}")
        } else {
            key.to_string()
        };

        if value.is_empty() {
            stack.push((indent, path));
        } else {
            out.insert(path, value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
record:
  start_time: "2024-01-01T00:00:00Z"
  duration: 330
  location:
    lat: 37.7749
    lon: -122.4194
device:
  model: MetaCamX1
  sn: ABC123
"#;

    #[test]
    fn parses_nested_fields() {
        let metadata = parse(SAMPLE);
        assert_eq!(metadata.duration_seconds, Some(330.0));
        assert_eq!(metadata.lat, Some(37.7749));
        assert_eq!(metadata.device_model.as_deref(), Some("MetaCamX1"));
        assert_eq!(metadata.device_sn.as_deref(), Some("ABC123"));
    }

    #[test]
    fn duration_classification_scenarios() {
        assert_eq!(classify_duration(330.0), DurationStatus::Optimal);
        assert_eq!(classify_duration(150.0), DurationStatus::ErrorTooShort);
        assert!(classify_duration(150.0).is_fatal());
    }

    #[test]
    fn device_id_requires_both_fields() {
        assert_eq!(
            device_id(Some("MetaCamX1"), Some("ABC123")),
            Some("MetaCamX1-ABC123".to_string())
        );
        assert_eq!(device_id(Some("MetaCamX1"), None), None);
    }
}
