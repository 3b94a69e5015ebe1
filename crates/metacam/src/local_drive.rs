//! A filesystem-backed `DriveClient`/`RemoteFile` pair.
//!
//! Spec §1 keeps the real cloud drive SDK external to this core; this
//! module is the one concrete backend the binary ships, treating a
//! local "staging" directory as the polled folder. It composes with
//! the same trait the production SDK client would implement, so
//! swapping in a real client later is a matter of adding an adapter,
//! not restructuring the orchestrator.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use metacam_drive::{DriveClient, DriveError, LocalFileRemote};
use metacam_types::PackageDescriptor;
use tracing::warn;

use crate::orchestrator::RemoteFileSource;

pub struct LocalDirectoryDriveClient {
    staging_dir: PathBuf,
}

impl LocalDirectoryDriveClient {
    pub fn new(staging_dir: PathBuf) -> Self {
        Self { staging_dir }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}

#[async_trait]
impl DriveClient for LocalDirectoryDriveClient {
    async fn list_folder(&self, _folder_id: &str) -> Result<Vec<PackageDescriptor>, DriveError> {
        let mut entries = match tokio::fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(DriveError::Sdk(err.to_string())),
        };

        let mut descriptors = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to read staging directory entry");
                    continue;
                }
            };

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "failed to stat staging entry");
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let mtime = metadata.modified().unwrap_or(SystemTime::now());
            descriptors.push(PackageDescriptor {
                remote_id: name.clone(),
                name,
                size_bytes: metadata.len(),
                remote_mtime: mtime,
                mime: "application/octet-stream".to_string(),
            });
        }

        Ok(descriptors)
    }
}

impl RemoteFileSource for LocalDirectoryDriveClient {
    type Remote = LocalFileRemote;

    fn remote_file(&self, descriptor: &PackageDescriptor) -> Self::Remote {
        LocalFileRemote::new(self.staging_dir.join(&descriptor.name), descriptor.remote_mtime)
    }
}
