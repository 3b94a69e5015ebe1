//! L16 — Sheets Writer: batches rows, retries SDK errors with backoff,
//! spools exhausted rows to a local dead-letter file (spec §4.16).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use metacam_types::Backoff;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::row::{RenderedCell, SheetRow};

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("sheets SDK error: {0}")]
    Sdk(String),

    #[error("dead-letter I/O error at {path}: {source}")]
    DeadLetterIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The external collaborator whose spreadsheet SDK this core stays
/// decoupled from (spec §1). Production code implements this against
/// the cloud spreadsheet API; tests implement it against an in-memory
/// fake so the orchestrator can be exercised with no network access.
#[async_trait]
pub trait SheetsClient: Send + Sync {
    async fn append_rows(
        &self,
        sheet_name: &str,
        rows: &[Vec<RenderedCell>],
    ) -> Result<(), SheetsError>;
}

/// In-memory fake used by orchestrator integration tests.
#[derive(Default)]
pub struct FakeSheetsClient {
    pub appended: Mutex<Vec<Vec<RenderedCell>>>,
    /// When `Some(n)`, the next `n` calls to `append_rows` fail before
    /// any succeed, exercising the writer's retry/dead-letter path.
    pub fail_next: Mutex<u32>,
}

impl FakeSheetsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_n(self, n: u32) -> Self {
        *self.fail_next.try_lock().expect("uncontended in test setup") = n;
        self
    }

    pub async fn row_count(&self) -> usize {
        self.appended.lock().await.len()
    }
}

#[async_trait]
impl SheetsClient for FakeSheetsClient {
    async fn append_rows(
        &self,
        _sheet_name: &str,
        rows: &[Vec<RenderedCell>],
    ) -> Result<(), SheetsError> {
        let mut remaining = self.fail_next.lock().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(SheetsError::Sdk("simulated transient failure".to_string()));
        }
        self.appended.lock().await.extend_from_slice(rows);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SheetsWriterConfig {
    pub sheet_name: String,
    pub batch_write_size: usize,
    pub retries: u32,
    pub dead_letter_path: PathBuf,
}

impl Default for SheetsWriterConfig {
    fn default() -> Self {
        Self {
            sheet_name: "Sheet1".to_string(),
            batch_write_size: 20,
            retries: 3,
            dead_letter_path: std::env::temp_dir().join("metacam-sheets-dead-letter.ndjson"),
        }
    }
}

/// One record spooled to the dead-letter file: the row that ultimately
/// failed plus why and when (spec §4.16, design note §9 spool format).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeadLetterRecord {
    pub row: SheetRow,
    pub reason: String,
    pub failed_at_unix: u64,
}

impl Default for DeadLetterRecord {
    fn default() -> Self {
        Self {
            row: SheetRow::default(),
            reason: String::new(),
            failed_at_unix: 0,
        }
    }
}

/// Serialized queue that appends rows in enqueue order (spec §5: "Sheets
/// Writer: serialized queue; appends ordered by enqueue time").
pub struct SheetsWriter<C: SheetsClient> {
    client: std::sync::Arc<C>,
    config: SheetsWriterConfig,
    queue: Mutex<VecDeque<SheetRow>>,
}

impl<C: SheetsClient> SheetsWriter<C> {
    pub fn new(client: std::sync::Arc<C>, config: SheetsWriterConfig) -> Self {
        Self {
            client,
            config,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueues one row. Flushes immediately once the queue reaches
    /// `batch_write_size` (spec §4.16: "Batch writes up to
    /// BATCH_WRITE_SIZE rows per API call").
    pub async fn write_row(&self, row: SheetRow) -> Result<(), SheetsError> {
        let should_flush = {
            let mut queue = self.queue.lock().await;
            queue.push_back(row);
            queue.len() >= self.config.batch_write_size
        };
        if should_flush {
            self.flush().await
        } else {
            Ok(())
        }
    }

    /// Drains the queue in batches of `batch_write_size`, retrying each
    /// batch with exponential backoff; rows in a batch that exhausts
    /// retries are spooled to the dead-letter file rather than dropped.
    pub async fn flush(&self) -> Result<(), SheetsError> {
        loop {
            let batch: Vec<SheetRow> = {
                let mut queue = self.queue.lock().await;
                if queue.is_empty() {
                    return Ok(());
                }
                let take = self.config.batch_write_size.min(queue.len());
                queue.drain(..take).collect()
            };

            let rendered: Vec<Vec<RenderedCell>> = batch.iter().map(SheetRow::render).collect();
            let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
            let mut attempt = 0;
            loop {
                match self.client.append_rows(&self.config.sheet_name, &rendered).await {
                    Ok(()) => {
                        info!(rows = batch.len(), "sheet batch appended");
                        break;
                    }
                    Err(err) => {
                        attempt += 1;
                        if attempt > self.config.retries {
                            warn!(rows = batch.len(), error = %err, "sheet batch exhausted retries, spooling to dead-letter");
                            self.spool_dead_letter(&batch, &err.to_string()).await?;
                            break;
                        }
                        let delay = backoff.next_delay();
                        warn!(attempt, error = %err, delay_secs = delay.as_secs(), "sheet append failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn spool_dead_letter(&self, rows: &[SheetRow], reason: &str) -> Result<(), SheetsError> {
        let failed_at_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut buffer = String::new();
        for row in rows {
            let record = DeadLetterRecord {
                row: row.clone(),
                reason: reason.to_string(),
                failed_at_unix,
            };
            match serde_json::to_string(&record) {
                Ok(line) => {
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
                Err(err) => error!(error = %err, "failed to serialize dead-letter record"),
            }
        }

        if let Some(parent) = self.config.dead_letter_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SheetsError::DeadLetterIo {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.dead_letter_path)
            .await
            .map_err(|source| SheetsError::DeadLetterIo {
                path: self.config.dead_letter_path.clone(),
                source,
            })?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|source| SheetsError::DeadLetterIo {
                path: self.config.dead_letter_path.clone(),
                source,
            })?;
        Ok(())
    }
}

/// Reads back every record currently spooled in the dead-letter file, for
/// an operator tool or a future replay job. Unknown fields/missing rows
/// are tolerated (`#[serde(default)]`) per the forward-compatibility
/// requirement in spec §6.
pub async fn read_dead_letter(path: &PathBuf) -> Vec<DeadLetterRecord> {
    let Ok(contents) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::SheetRow;

    #[tokio::test]
    async fn flush_appends_all_queued_rows() {
        let client = std::sync::Arc::new(FakeSheetsClient::new());
        let dir = tempfile::tempdir().unwrap();
        let writer = SheetsWriter::new(
            client.clone(),
            SheetsWriterConfig {
                batch_write_size: 10,
                dead_letter_path: dir.path().join("dead.ndjson"),
                ..SheetsWriterConfig::default()
            },
        );

        for i in 0..3 {
            writer
                .write_row(SheetRow::new(format!("id{i}"), format!("pkg{i}.zip")))
                .await
                .unwrap();
        }
        writer.flush().await.unwrap();

        assert_eq!(client.row_count().await, 3);
    }

    #[tokio::test]
    async fn batch_flushes_automatically_at_threshold() {
        let client = std::sync::Arc::new(FakeSheetsClient::new());
        let dir = tempfile::tempdir().unwrap();
        let writer = SheetsWriter::new(
            client.clone(),
            SheetsWriterConfig {
                batch_write_size: 2,
                dead_letter_path: dir.path().join("dead.ndjson"),
                ..SheetsWriterConfig::default()
            },
        );

        writer.write_row(SheetRow::new("a", "a.zip")).await.unwrap();
        assert_eq!(client.row_count().await, 0);
        writer.write_row(SheetRow::new("b", "b.zip")).await.unwrap();
        assert_eq!(client.row_count().await, 2);
    }

    #[tokio::test]
    async fn rows_that_exhaust_retries_are_spooled_to_dead_letter() {
        let client = std::sync::Arc::new(FakeSheetsClient::new().fail_next_n(10));
        let dir = tempfile::tempdir().unwrap();
        let dead_letter_path = dir.path().join("dead.ndjson");
        let writer = SheetsWriter::new(
            client.clone(),
            SheetsWriterConfig {
                batch_write_size: 1,
                retries: 1,
                dead_letter_path: dead_letter_path.clone(),
                ..SheetsWriterConfig::default()
            },
        );

        writer.write_row(SheetRow::new("id1", "pkg.zip")).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(client.row_count().await, 0);
        let records = read_dead_letter(&dead_letter_path).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].row.file_id, "id1");
    }
}
