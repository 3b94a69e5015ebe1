//! A filesystem-backed `SheetsClient`.
//!
//! Mirrors `local_drive`'s role: the real spreadsheet SDK is external
//! to this core (spec §1), so this appends rows to a local CSV file as
//! the one concrete backend the binary ships. Cell background colors
//! (spec §4.16) are computed upstream in `metacam_sheets::SheetRow` and
//! would drive a real Sheets API's cell-formatting call; CSV has no
//! equivalent, so they're dropped here rather than faked.

use std::path::PathBuf;

use async_trait::async_trait;
use metacam_sheets::{RenderedCell, SheetsClient, SheetsError, COLUMN_HEADERS};
use tokio::io::AsyncWriteExt;

pub struct CsvSheetsClient {
    path: PathBuf,
}

impl CsvSheetsClient {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SheetsClient for CsvSheetsClient {
    async fn append_rows(
        &self,
        _sheet_name: &str,
        rows: &[Vec<RenderedCell>],
    ) -> Result<(), SheetsError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| SheetsError::Sdk(err.to_string()))?;
        }

        let needs_header = !tokio::fs::try_exists(&self.path).await.unwrap_or(false);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| SheetsError::Sdk(err.to_string()))?;

        let mut buffer = String::new();
        if needs_header {
            buffer.push_str(&csv_line(COLUMN_HEADERS.iter().map(|h| h.to_string())));
            buffer.push('\n');
        }
        for row in rows {
            buffer.push_str(&csv_line(row.iter().map(|cell| cell.text.clone())));
            buffer.push('\n');
        }

        file.write_all(buffer.as_bytes())
            .await
            .map_err(|err| SheetsError::Sdk(err.to_string()))?;
        Ok(())
    }
}

fn csv_line(fields: impl Iterator<Item = String>) -> String {
    fields.map(|f| escape_csv_field(&f)).collect::<Vec<_>>().join(",")
}

fn escape_csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacam_sheets::SheetRow;

    #[tokio::test]
    async fn writes_header_once_then_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.csv");
        let client = CsvSheetsClient::new(path.clone());

        let row_a = SheetRow::new("id1", "a.zip").render();
        client.append_rows("Sheet1", &[row_a]).await.unwrap();
        let row_b = SheetRow::new("id2", "b,with,commas").render();
        client.append_rows("Sheet1", &[row_b]).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("File ID,File Name"));
        assert!(lines[2].contains("\"b,with,commas\""));
    }
}
