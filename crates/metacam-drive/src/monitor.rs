//! L14 — Drive Monitor: polls the remote folder, filters by extension
//! whitelist and size, and yields descriptors for items never emitted
//! before in this process's lifetime (spec §4.14).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metacam_types::{Backoff, PackageDescriptor};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("drive SDK error: {0}")]
    Sdk(String),
}

/// The external collaborator whose SDK this core stays decoupled from
/// (spec §1). Production code implements this against the cloud drive
/// SDK; tests implement it against an in-memory fake, enabling
/// end-to-end orchestrator tests with no network access.
#[async_trait]
pub trait DriveClient: Send + Sync {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<PackageDescriptor>, DriveError>;
}

#[derive(Debug, Clone)]
pub struct DriveMonitorConfig {
    pub folder_id: String,
    pub check_interval: Duration,
    pub allowed_extensions: HashSet<String>,
    pub max_file_size_mb: u64,
}

impl Default for DriveMonitorConfig {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            check_interval: Duration::from_secs(30),
            allowed_extensions: ["zip", "rar", "7z", "tar", "gz"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_file_size_mb: 8192,
        }
    }
}

/// Polls `client` on `config.check_interval`, pushing newly-seen
/// descriptors to `tx`. "Newly seen" means never emitted before by this
/// monitor instance (spec §4.14); cross-restart dedup is the Tracker's
/// (L1) job, applied by the Orchestrator after receiving a descriptor.
pub struct DriveMonitor<C: DriveClient> {
    client: Arc<C>,
    config: DriveMonitorConfig,
    emitted: Mutex<HashSet<String>>,
}

impl<C: DriveClient> DriveMonitor<C> {
    pub fn new(client: Arc<C>, config: DriveMonitorConfig) -> Self {
        Self {
            client,
            config,
            emitted: Mutex::new(HashSet::new()),
        }
    }

    /// Runs the poll loop until `shutdown` resolves, sending each novel
    /// descriptor to `tx`. SDK errors back off and continue rather than
    /// terminate the loop (spec §4.14, §7).
    pub async fn run(
        &self,
        tx: mpsc::Sender<PackageDescriptor>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        loop {
            if *shutdown.borrow() {
                info!("drive monitor stopping: shutdown signal received");
                return;
            }

            match self.poll_once(&tx).await {
                Ok(found) => {
                    backoff.reset();
                    if found > 0 {
                        info!(found, "drive monitor emitted new descriptors");
                    }
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, delay_secs = delay.as_secs(), "drive poll failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// One poll pass; returns the count of newly-emitted descriptors.
    /// Exposed separately from `run` so tests and `--once` CLI mode can
    /// drive a single pass deterministically.
    pub async fn poll_once(
        &self,
        tx: &mpsc::Sender<PackageDescriptor>,
    ) -> Result<usize, DriveError> {
        let items = self.client.list_folder(&self.config.folder_id).await?;
        let mut emitted_count = 0;

        let mut emitted = self.emitted.lock().await;
        for item in items {
            if emitted.contains(&item.remote_id) {
                continue;
            }
            if !self.passes_filters(&item) {
                continue;
            }
            emitted.insert(item.remote_id.clone());
            if tx.send(item).await.is_err() {
                warn!("drive monitor receiver dropped; stopping emission");
                break;
            }
            emitted_count += 1;
        }
        Ok(emitted_count)
    }

    fn passes_filters(&self, item: &PackageDescriptor) -> bool {
        let size_mb = item.size_bytes / (1024 * 1024);
        if size_mb > self.config.max_file_size_mb {
            return false;
        }
        if self.config.allowed_extensions.is_empty() {
            return true;
        }
        let extension = item
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        self.config.allowed_extensions.contains(&extension)
    }
}

/// In-memory fake implementing [`DriveClient`], used by orchestrator
/// integration tests and `--test-connection` dry runs (spec §1's
/// decoupling requirement).
pub struct FakeDriveClient {
    items: Mutex<Vec<PackageDescriptor>>,
}

impl FakeDriveClient {
    pub fn new(items: Vec<PackageDescriptor>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub async fn push(&self, item: PackageDescriptor) {
        self.items.lock().await.push(item);
    }
}

#[async_trait]
impl DriveClient for FakeDriveClient {
    async fn list_folder(&self, _folder_id: &str) -> Result<Vec<PackageDescriptor>, DriveError> {
        Ok(self.items.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn descriptor(id: &str, name: &str, size_bytes: u64) -> PackageDescriptor {
        PackageDescriptor {
            remote_id: id.to_string(),
            name: name.to_string(),
            size_bytes,
            remote_mtime: SystemTime::now(),
            mime: "application/zip".to_string(),
        }
    }

    #[tokio::test]
    async fn emits_each_remote_id_only_once() {
        let client = Arc::new(FakeDriveClient::new(vec![descriptor("a", "a.zip", 1024)]));
        let monitor = DriveMonitor::new(client, DriveMonitorConfig::default());
        let (tx, mut rx) = mpsc::channel(8);

        let first = monitor.poll_once(&tx).await.unwrap();
        let second = monitor.poll_once(&tx).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn filters_out_disallowed_extensions() {
        let client = Arc::new(FakeDriveClient::new(vec![descriptor("a", "a.exe", 1024)]));
        let monitor = DriveMonitor::new(client, DriveMonitorConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        let emitted = monitor.poll_once(&tx).await.unwrap();
        assert_eq!(emitted, 0);
    }

    #[tokio::test]
    async fn filters_out_oversized_files() {
        let client = Arc::new(FakeDriveClient::new(vec![descriptor(
            "a",
            "a.zip",
            10 * 1024 * 1024 * 1024,
        )]));
        let config = DriveMonitorConfig {
            max_file_size_mb: 1024,
            ..DriveMonitorConfig::default()
        };
        let monitor = DriveMonitor::new(client, config);
        let (tx, _rx) = mpsc::channel(8);

        let emitted = monitor.poll_once(&tx).await.unwrap();
        assert_eq!(emitted, 0);
    }
}
