//! L15 — Downloader: ranged/chunked download with resume, backoff, and
//! progress reporting (spec §4.15, scenario 8).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use metacam_types::Backoff;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("remote read error: {0}")]
    Remote(String),

    #[error("local I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("downloaded {got} bytes, expected {expected}")]
    SizeMismatch { got: u64, expected: u64 },

    #[error("download of {0} exceeded its overall timeout")]
    Timeout(String),
}

/// The external collaborator whose HTTP/SDK client this core stays
/// decoupled from (spec §1). Production code implements this over the
/// cloud drive's download endpoint; tests use a local-file fake.
#[async_trait]
pub trait RemoteFile: Send + Sync {
    /// Total size of the remote object, used both for completion checks
    /// and for deciding whether a local partial file can still resume
    /// (spec §4.15: resume requires identical remote size/mtime).
    async fn remote_size(&self) -> Result<u64, DownloadError>;

    async fn remote_mtime(&self) -> Result<SystemTime, DownloadError>;

    /// Reads `[offset, offset+len)` and appends it to `dest`.
    async fn read_range_into(
        &self,
        offset: u64,
        len: u64,
        dest: &mut tokio::fs::File,
    ) -> Result<u64, DownloadError>;
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub bytes_per_sec: f64,
    pub eta_s: f64,
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub chunk_size_bytes: u64,
    pub retries: u32,
    pub overall_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 32 * 1024 * 1024,
            retries: 3,
            overall_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Downloader {
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    /// Downloads `remote` to `dest_path`, resuming from a partial file if
    /// one exists and the remote object's size/mtime still matches the
    /// `.part.meta` sidecar written on a prior attempt (spec §4.15
    /// scenario 8).
    pub async fn download<R, F>(
        &self,
        remote: &R,
        dest_path: &Path,
        mut on_progress: F,
    ) -> Result<(), DownloadError>
    where
        R: RemoteFile,
        F: FnMut(DownloadProgress),
    {
        let started = Instant::now();
        let total = remote.remote_size().await?;
        let mtime = remote.remote_mtime().await?;

        let part_path = part_path(dest_path);
        let meta_path = meta_path(dest_path);

        let resume_from = match read_resume_meta(&meta_path).await {
            Some((resumed_size, resumed_mtime)) if resumed_mtime == mtime => {
                let on_disk = tokio::fs::metadata(&part_path).await.map(|m| m.len()).unwrap_or(0);
                if on_disk == resumed_size && on_disk <= total {
                    on_disk
                } else {
                    0
                }
            }
            _ => 0,
        };

        if resume_from > 0 {
            info!(resume_from, total, "resuming partial download");
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&part_path)
            .await
            .map_err(|source| DownloadError::Io {
                path: part_path.clone(),
                source,
            })?;
        file.seek(std::io::SeekFrom::Start(resume_from))
            .await
            .map_err(|source| DownloadError::Io {
                path: part_path.clone(),
                source,
            })?;
        file.set_len(resume_from).await.map_err(|source| DownloadError::Io {
            path: part_path.clone(),
            source,
        })?;

        let mut offset = resume_from;
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

        while offset < total {
            if started.elapsed() > self.config.overall_timeout {
                return Err(DownloadError::Timeout(dest_path.display().to_string()));
            }

            let remaining = total - offset;
            let this_chunk = remaining.min(self.config.chunk_size_bytes);

            let mut attempt = 0;
            loop {
                match remote.read_range_into(offset, this_chunk, &mut file).await {
                    Ok(written) => {
                        offset += written;
                        file.flush().await.map_err(|source| DownloadError::Io {
                            path: part_path.clone(),
                            source,
                        })?;
                        write_resume_meta(&meta_path, offset, mtime).await?;
                        backoff.reset();
                        break;
                    }
                    Err(err) => {
                        attempt += 1;
                        if attempt > self.config.retries {
                            return Err(err);
                        }
                        let delay = backoff.next_delay();
                        warn!(attempt, error = %err, delay_secs = delay.as_secs(), "chunk download failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            let elapsed = started.elapsed().as_secs_f64().max(0.001);
            let bytes_per_sec = offset as f64 / elapsed;
            let eta_s = if bytes_per_sec > 0.0 {
                (total - offset) as f64 / bytes_per_sec
            } else {
                f64::INFINITY
            };
            on_progress(DownloadProgress {
                bytes_done: offset,
                bytes_total: total,
                bytes_per_sec,
                eta_s,
            });
        }

        let final_size = tokio::fs::metadata(&part_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if final_size != total {
            return Err(DownloadError::SizeMismatch {
                got: final_size,
                expected: total,
            });
        }

        tokio::fs::rename(&part_path, dest_path)
            .await
            .map_err(|source| DownloadError::Io {
                path: dest_path.to_path_buf(),
                source,
            })?;
        let _ = tokio::fs::remove_file(&meta_path).await;

        Ok(())
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn meta_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part.meta");
    dest.with_file_name(name)
}

async fn read_resume_meta(meta_path: &Path) -> Option<(u64, SystemTime)> {
    let contents = tokio::fs::read_to_string(meta_path).await.ok()?;
    let mut parts = contents.trim().split(',');
    let size: u64 = parts.next()?.parse().ok()?;
    let mtime_secs: u64 = parts.next()?.parse().ok()?;
    Some((size, SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs)))
}

async fn write_resume_meta(
    meta_path: &Path,
    size: u64,
    mtime: SystemTime,
) -> Result<(), DownloadError> {
    let mtime_secs = mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    tokio::fs::write(meta_path, format!("{size},{mtime_secs}"))
        .await
        .map_err(|source| DownloadError::Io {
            path: meta_path.to_path_buf(),
            source,
        })
}

/// Local-file fake implementing [`RemoteFile`], used to exercise resume
/// semantics without a network dependency (spec §8 scenario 8).
pub struct LocalFileRemote {
    path: PathBuf,
    mtime: SystemTime,
}

impl LocalFileRemote {
    pub fn new(path: PathBuf, mtime: SystemTime) -> Self {
        Self { path, mtime }
    }
}

#[async_trait]
impl RemoteFile for LocalFileRemote {
    async fn remote_size(&self) -> Result<u64, DownloadError> {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .map_err(|source| DownloadError::Io {
                path: self.path.clone(),
                source,
            })
    }

    async fn remote_mtime(&self) -> Result<SystemTime, DownloadError> {
        Ok(self.mtime)
    }

    async fn read_range_into(
        &self,
        offset: u64,
        len: u64,
        dest: &mut tokio::fs::File,
    ) -> Result<u64, DownloadError> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt as _};

        let mut source = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| DownloadError::Io {
                path: self.path.clone(),
                source,
            })?;
        source
            .seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|source| DownloadError::Io {
                path: self.path.clone(),
                source,
            })?;
        let mut buf = vec![0u8; len as usize];
        let mut read_total = 0usize;
        while read_total < buf.len() {
            let n = source
                .read(&mut buf[read_total..])
                .await
                .map_err(|source| DownloadError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        buf.truncate(read_total);
        dest.write_all(&buf)
            .await
            .map_err(|source| DownloadError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(buf.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn downloads_whole_file_in_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        tokio::fs::write(&source, vec![7u8; 1024]).await.unwrap();

        let remote = LocalFileRemote::new(source, SystemTime::now());
        let downloader = Downloader::new(DownloaderConfig::default());
        let dest = dir.path().join("dest.bin");

        downloader.download(&remote, &dest, |_| {}).await.unwrap();
        let bytes = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(bytes.len(), 1024);
    }

    #[tokio::test]
    async fn resumes_from_partial_file_with_matching_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let data: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        tokio::fs::write(&source, &data).await.unwrap();

        let mtime = SystemTime::now();
        let remote = LocalFileRemote::new(source, mtime);
        let dest = dir.path().join("dest.bin");

        // Simulate an interrupted download at 50%.
        let part = part_path(&dest);
        tokio::fs::write(&part, &data[..1024]).await.unwrap();
        write_resume_meta(&meta_path(&dest), 1024, mtime).await.unwrap();

        let downloader = Downloader::new(DownloaderConfig::default());
        downloader.download(&remote, &dest, |_| {}).await.unwrap();

        let bytes = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(bytes, data);
    }

    #[tokio::test]
    async fn stale_resume_metadata_with_different_mtime_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        tokio::fs::write(&source, vec![1u8; 512]).await.unwrap();

        let remote = LocalFileRemote::new(source, SystemTime::now());
        let dest = dir.path().join("dest.bin");

        let part = part_path(&dest);
        tokio::fs::write(&part, vec![9u8; 256]).await.unwrap();
        write_resume_meta(
            &meta_path(&dest),
            256,
            SystemTime::now() - Duration::from_secs(3600),
        )
        .await
        .unwrap();

        let downloader = Downloader::new(DownloaderConfig::default());
        downloader.download(&remote, &dest, |_| {}).await.unwrap();

        let bytes = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(bytes, vec![1u8; 512]);
    }
}
