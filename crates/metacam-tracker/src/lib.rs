//! L1 — Tracker: the persistent set of already-processed package ids.
//!
//! Backed by a single file rewritten atomically (write-to-temp, fsync,
//! rename) so a crash mid-write never corrupts the ledger; the file is
//! the source of truth across restarts (spec §4.1, design note §9).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One record of a processed package. Extra fields on disk that this
/// version doesn't know about are ignored (`#[serde(default)]` on every
/// field keeps the format forward-compatible per spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerRecord {
    pub remote_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "now_unix")]
    pub processed_at_unix: u64,
    #[serde(default)]
    pub outcome: String,
}

impl TrackerRecord {
    pub fn new(remote_id: impl Into<String>, name: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            name: name.into(),
            processed_at_unix: now_unix(),
            outcome: outcome.into(),
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PersistedState {
    processed_files: Vec<TrackerRecord>,
    last_check_time: u64,
    total_processed: u64,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to read tracker file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tracker file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist tracker file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persistent set of processed remote ids, guarded by a mutex and
/// rewritten atomically on every `mark`.
pub struct Tracker {
    path: PathBuf,
    retain: Duration,
    state: Mutex<PersistedState>,
}

impl Tracker {
    /// Loads the tracker file if present, pruning any record older than
    /// `retain_days` (spec §4.1).
    pub async fn open(path: impl Into<PathBuf>, retain_days: u32) -> Result<Self, TrackerError> {
        let path = path.into();
        let retain = Duration::from_secs(u64::from(retain_days) * 86_400);

        let mut state = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).map_err(|source| TrackerError::Read {
                    path: path.clone(),
                    source,
                })?;
            serde_json::from_str::<PersistedState>(&contents).map_err(|source| {
                TrackerError::Parse {
                    path: path.clone(),
                    source,
                }
            })?
        } else {
            PersistedState::default()
        };

        let cutoff = now_unix().saturating_sub(retain.as_secs());
        let before = state.processed_files.len();
        state
            .processed_files
            .retain(|record| record.processed_at_unix >= cutoff);
        let pruned = before - state.processed_files.len();
        if pruned > 0 {
            info!(pruned, "pruned expired tracker entries on startup");
        }

        let tracker = Self {
            path,
            retain,
            state: Mutex::new(state),
        };
        tracker.persist().await?;
        Ok(tracker)
    }

    /// `seen(remote_id) -> bool`.
    pub async fn seen(&self, remote_id: &str) -> bool {
        let state = self.state.lock().await;
        state
            .processed_files
            .iter()
            .any(|record| record.remote_id == remote_id)
    }

    /// `mark(remote_id, record)`. Updates the latest record for a
    /// duplicate id in place rather than appending a duplicate.
    pub async fn mark(&self, record: TrackerRecord) -> Result<(), TrackerError> {
        {
            let mut state = self.state.lock().await;
            match state
                .processed_files
                .iter_mut()
                .find(|existing| existing.remote_id == record.remote_id)
            {
                Some(existing) => *existing = record,
                None => {
                    state.processed_files.push(record);
                    state.total_processed = state.total_processed.saturating_add(1);
                }
            }
            state.last_check_time = now_unix();
        }
        self.persist().await
    }

    /// `snapshot() -> list of record`.
    pub async fn snapshot(&self) -> Vec<TrackerRecord> {
        self.state.lock().await.processed_files.clone()
    }

    pub async fn total_processed(&self) -> u64 {
        self.state.lock().await.total_processed
    }

    async fn persist(&self) -> Result<(), TrackerError> {
        let snapshot = {
            let state = self.state.lock().await;
            serde_json::to_string_pretty(&*state).map_err(|source| TrackerError::Parse {
                path: self.path.clone(),
                source,
            })?
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &snapshot))
            .await
            .map_err(|join_err| TrackerError::Write {
                path: self.path.clone(),
                source: std::io::Error::other(join_err.to_string()),
            })??;

        debug!(path = %self.path.display(), "tracker file persisted");
        Ok(())
    }

    #[cfg(test)]
    fn retain_window(&self) -> Duration {
        self.retain
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), TrackerError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| TrackerError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|source| TrackerError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    use std::io::Write as _;
    temp.write_all(contents.as_bytes())
        .map_err(|source| TrackerError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    temp.as_file_mut()
        .sync_all()
        .map_err(|source| TrackerError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    temp.persist(path)
        .map_err(|err| TrackerError::Write {
            path: path.to_path_buf(),
            source: err.error,
        })?;
    Ok(())
}

/// Maps `mark`/`seen` failures into a warning rather than a crash; the
/// orchestrator is never allowed to go down because the tracker file
/// could not be written once (spec §7).
pub fn warn_on_persist_failure(remote_id: &str, err: &TrackerError) {
    warn!(remote_id, error = %err, "tracker persist failed; will retry on next mark");
}

/// Convenience wrapper for callers that just want counts keyed by
/// outcome, e.g. for a `--test-connection` style summary.
pub fn tally_outcomes(records: &[TrackerRecord]) -> BTreeMap<String, u64> {
    let mut tally = BTreeMap::new();
    for record in records {
        *tally.entry(record.outcome.clone()).or_insert(0) += 1;
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_then_seen() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(dir.path().join("tracker.json"), 30)
            .await
            .unwrap();

        assert!(!tracker.seen("pkg-1").await);
        tracker
            .mark(TrackerRecord::new("pkg-1", "pkg-1.zip", "DONE"))
            .await
            .unwrap();
        assert!(tracker.seen("pkg-1").await);
    }

    #[tokio::test]
    async fn duplicate_mark_updates_latest_without_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(dir.path().join("tracker.json"), 30)
            .await
            .unwrap();

        tracker
            .mark(TrackerRecord::new("pkg-1", "pkg-1.zip", "FAILED"))
            .await
            .unwrap();
        tracker
            .mark(TrackerRecord::new("pkg-1", "pkg-1.zip", "DONE"))
            .await
            .unwrap();

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].outcome, "DONE");
        assert_eq!(tracker.total_processed().await, 1);
    }

    #[tokio::test]
    async fn survives_restart_via_atomic_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");

        {
            let tracker = Tracker::open(&path, 30).await.unwrap();
            tracker
                .mark(TrackerRecord::new("pkg-1", "pkg-1.zip", "DONE"))
                .await
                .unwrap();
        }

        let reopened = Tracker::open(&path, 30).await.unwrap();
        assert!(reopened.seen("pkg-1").await);
    }

    #[tokio::test]
    async fn prunes_entries_older_than_retain_days() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");

        let stale = TrackerRecord {
            remote_id: "old".into(),
            name: "old.zip".into(),
            processed_at_unix: 0,
            outcome: "DONE".into(),
        };
        let state = PersistedState {
            processed_files: vec![stale],
            last_check_time: 0,
            total_processed: 1,
        };
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let tracker = Tracker::open(&path, 1).await.unwrap();
        assert!(!tracker.seen("old").await);
        assert!(tracker.retain_window() > Duration::ZERO);
    }

    #[tokio::test]
    async fn ignores_unknown_fields_for_forward_compatibility() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        std::fs::write(
            &path,
            r#"{"processed_files": [], "last_check_time": 0, "total_processed": 0, "future_field": 42}"#,
        )
        .unwrap();

        let tracker = Tracker::open(&path, 30).await;
        assert!(tracker.is_ok());
    }
}
