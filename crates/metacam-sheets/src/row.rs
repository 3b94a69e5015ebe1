//! Sheet row schema (spec §6) and the background-color mapping for
//! known statuses (spec §4.16: optimal → green, warning → yellow,
//! error → red, unknown → gray).

use serde::{Deserialize, Serialize};

/// Background color a renderer applies to a status cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowColor {
    Green,
    Yellow,
    Red,
    Gray,
}

/// A status classification shared by several columns (extract status,
/// size status, PCD scale, ...). Maps to a color independent of which
/// column it renders in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStatus {
    Optimal,
    Warning,
    Error,
    Unknown,
}

impl CellStatus {
    pub fn color(self) -> RowColor {
        match self {
            CellStatus::Optimal => RowColor::Green,
            CellStatus::Warning => RowColor::Yellow,
            CellStatus::Error => RowColor::Red,
            CellStatus::Unknown => RowColor::Gray,
        }
    }

    /// Classifies the point-cloud/extracted-size status strings produced
    /// elsewhere in the workspace (`pcd::ScaleStatus::as_str()`,
    /// `metacam_archive::SizeStatus`) into a cell status without those
    /// crates being a dependency of this one.
    pub fn from_status_str(value: &str) -> Self {
        match value {
            "optimal" => CellStatus::Optimal,
            s if s.starts_with("warning") => CellStatus::Warning,
            s if s.starts_with("error") || s == "not_found" => CellStatus::Error,
            _ => CellStatus::Unknown,
        }
    }
}

/// One rendered cell: its text (already "N/A"-substituted if absent)
/// and an optional background color for status columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedCell {
    pub text: String,
    pub color: Option<RowColor>,
}

impl RenderedCell {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
        }
    }

    fn na() -> Self {
        Self::plain("N/A")
    }

    fn status(text: impl Into<String>, status: CellStatus) -> Self {
        Self {
            text: text.into(),
            color: Some(status.color()),
        }
    }
}

/// The fixed ordered sheet schema (spec §6). Every field is optional
/// except `file_id`/`file_name`, which the Drive Monitor always
/// supplies; missing values render as `"N/A"` (spec §4.16).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetRow {
    pub file_id: String,
    pub file_name: String,
    pub upload_time: Option<String>,
    pub file_size_mib: Option<f64>,
    pub file_type: Option<String>,
    pub extract_status: Option<CellStatus>,
    pub file_count: Option<u64>,
    pub process_time: Option<String>,
    pub validation_score: Option<f64>,
    pub start_time: Option<String>,
    pub duration_hhmmss: Option<String>,
    pub location: Option<String>,
    pub scene_type: Option<String>,
    pub size_status: Option<CellStatus>,
    pub pcd_scale: Option<String>,
    pub device_id: Option<String>,
    pub transient_decision: Option<String>,
    pub wdd: Option<f64>,
    pub wpo: Option<f64>,
    pub sai: Option<f64>,
    pub error_message: Option<String>,
    pub warning_message: Option<String>,
    pub notes: Option<String>,
}

impl SheetRow {
    pub fn new(file_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Renders the row as the 23 ordered cells of spec §6's sheet
    /// schema, substituting `"N/A"` for every absent value.
    pub fn render(&self) -> Vec<RenderedCell> {
        vec![
            RenderedCell::plain(&self.file_id),
            RenderedCell::plain(&self.file_name),
            opt_text(&self.upload_time),
            opt_num(self.file_size_mib),
            opt_text(&self.file_type),
            opt_status(self.extract_status),
            opt_num(self.file_count.map(|n| n as f64)),
            opt_text(&self.process_time),
            opt_num(self.validation_score),
            opt_text(&self.start_time),
            opt_text(&self.duration_hhmmss),
            opt_text(&self.location),
            opt_text(&self.scene_type),
            opt_status(self.size_status),
            opt_text(&self.pcd_scale),
            opt_text(&self.device_id),
            opt_text(&self.transient_decision),
            opt_num(self.wdd),
            opt_num(self.wpo),
            opt_num(self.sai),
            opt_text(&self.error_message),
            opt_text(&self.warning_message),
            opt_text(&self.notes),
        ]
    }
}

/// Column headers in schema order, for a client that wants to write a
/// header row once per sheet.
pub const COLUMN_HEADERS: [&str; 23] = [
    "File ID",
    "File Name",
    "Upload Time",
    "File Size (MiB)",
    "File Type",
    "Extract Status",
    "File Count",
    "Process Time",
    "Validation Score",
    "Start Time",
    "Duration (HH:MM:SS)",
    "Location",
    "Scene Type",
    "Size Status",
    "PCD Scale",
    "Device ID",
    "Transient Decision",
    "WDD",
    "WPO",
    "SAI",
    "Error Message",
    "Warning Message",
    "Notes",
];

fn opt_text(value: &Option<String>) -> RenderedCell {
    match value {
        Some(v) if !v.is_empty() => RenderedCell::plain(v.clone()),
        _ => RenderedCell::na(),
    }
}

fn opt_num(value: Option<f64>) -> RenderedCell {
    match value {
        Some(v) => RenderedCell::plain(format!("{v:.2}")),
        None => RenderedCell::na(),
    }
}

fn opt_status(value: Option<CellStatus>) -> RenderedCell {
    match value {
        Some(status) => RenderedCell::status(format!("{status:?}").to_lowercase(), status),
        None => RenderedCell::na(),
    }
}

/// Formats a whole number of seconds as `HH:MM:SS` for the Duration
/// column (spec §6).
pub fn format_duration_hhmmss(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_render_as_na() {
        let row = SheetRow::new("id1", "pkg.zip");
        let cells = row.render();
        assert_eq!(cells[0].text, "id1");
        assert_eq!(cells[1].text, "pkg.zip");
        assert_eq!(cells[2].text, "N/A");
        assert!(cells[2].color.is_none());
    }

    #[test]
    fn status_cells_carry_color() {
        let mut row = SheetRow::new("id1", "pkg.zip");
        row.extract_status = Some(CellStatus::Optimal);
        row.size_status = Some(CellStatus::Error);
        let cells = row.render();
        assert_eq!(cells[5].color, Some(RowColor::Green));
        assert_eq!(cells[13].color, Some(RowColor::Red));
    }

    #[test]
    fn status_str_classification() {
        assert_eq!(CellStatus::from_status_str("optimal"), CellStatus::Optimal);
        assert_eq!(CellStatus::from_status_str("warning_small"), CellStatus::Warning);
        assert_eq!(CellStatus::from_status_str("error_too_small"), CellStatus::Error);
        assert_eq!(CellStatus::from_status_str("not_found"), CellStatus::Error);
        assert_eq!(CellStatus::from_status_str("weird"), CellStatus::Unknown);
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration_hhmmss(330), "00:05:30");
        assert_eq!(format_duration_hhmmss(3661), "01:01:01");
    }
}
