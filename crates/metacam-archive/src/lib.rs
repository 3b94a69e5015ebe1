//! L2 — Archive Inspector: format sniffing, password-protected extraction,
//! and scratch-directory management for incoming MetaCam packages.
//!
//! Decompressors themselves are treated the way the driving binaries of
//! L13 are: external collaborators invoked through a narrow interface.
//! Zip and tar/tar.gz are native (the corpus reaches for `zip` and
//! `tar`+`flate2` directly); rar and 7z are shelled out to the `unrar`/`7z`
//! tools the way L13 shells out to the reconstruction executables, since
//! no pure-Rust decoder for either ships in this workspace's dependency
//! tree.

mod extract;
mod format;

pub use format::sniff_format;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use metacam_types::ArchiveFormat;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unrecognized archive format for {path}")]
    UnknownFormat { path: PathBuf },

    #[error("archive {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("archive {path} requires a password not in the candidate list")]
    PasswordRequired { path: PathBuf },

    #[error("archive {path} is {size_mb} MiB, exceeding MAX_FILE_SIZE_MB={limit_mb}")]
    OversizedBefore {
        path: PathBuf,
        size_mb: u64,
        limit_mb: u64,
    },

    #[error("extracted contents of {path} total {size_gib:.2} GiB, outside the acceptable [0.5, 6] GiB window")]
    OversizedAfter { path: PathBuf, size_gib: f64 },

    #[error("I/O error handling {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ArchiveInspectorConfig {
    /// Scratch directories are created as `{scratch_root}/{uuid}`.
    pub scratch_root: PathBuf,
    pub max_file_size_mb: u64,
    /// Ordered candidate passwords; the inspector stops at first success.
    pub default_passwords: Vec<String>,
    pub unrar_binary: PathBuf,
    pub sevenzip_binary: PathBuf,
}

impl Default for ArchiveInspectorConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("metacam-scratch"),
            max_file_size_mb: 8192,
            default_passwords: Vec::new(),
            unrar_binary: PathBuf::from("unrar"),
            sevenzip_binary: PathBuf::from("7z"),
        }
    }
}

/// Post-extraction size classification (spec §4.2): optimal window
/// [0.8, 3.5] GiB, acceptable window [0.5, 6] GiB, anything outside
/// acceptable is an error; within the warning band but outside optimal
/// is a warning the caller should surface, not a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeStatus {
    Optimal,
    Warning,
    Error,
}

pub fn classify_extracted_size(total_bytes: u64) -> SizeStatus {
    const OPTIMAL_MIN: u64 = GIB * 8 / 10; // 0.8 GiB
    const OPTIMAL_MAX: u64 = GIB * 7 / 2; // 3.5 GiB
    const ACCEPTABLE_MIN: u64 = GIB / 2; // 0.5 GiB
    const ACCEPTABLE_MAX: u64 = GIB * 6; // 6 GiB

    if total_bytes < ACCEPTABLE_MIN || total_bytes > ACCEPTABLE_MAX {
        SizeStatus::Error
    } else if total_bytes < OPTIMAL_MIN || total_bytes > OPTIMAL_MAX {
        SizeStatus::Warning
    } else {
        SizeStatus::Optimal
    }
}

/// `inspect(path) -> ExtractedPackage | error(kind)` (spec §4.2).
pub async fn inspect(
    path: &Path,
    config: &ArchiveInspectorConfig,
) -> Result<(metacam_types::ExtractedPackage, SizeStatus), ArchiveError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let size_mb = metadata.len() / (1024 * 1024);
    if size_mb > config.max_file_size_mb {
        return Err(ArchiveError::OversizedBefore {
            path: path.to_path_buf(),
            size_mb,
            limit_mb: config.max_file_size_mb,
        });
    }

    let format = sniff_format(path)
        .await?
        .ok_or_else(|| ArchiveError::UnknownFormat {
            path: path.to_path_buf(),
        })?;

    tokio::fs::create_dir_all(&config.scratch_root)
        .await
        .map_err(|source| ArchiveError::Io {
            path: config.scratch_root.clone(),
            source,
        })?;
    let scratch_dir = config.scratch_root.join(uuid::Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&scratch_dir)
        .await
        .map_err(|source| ArchiveError::Io {
            path: scratch_dir.clone(),
            source,
        })?;

    let extraction = extract::extract(path, format, &scratch_dir, config).await;

    let (files, password_used) = match extraction {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "extraction failed, removing scratch dir");
            let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
            return Err(err);
        }
    };

    let total_bytes = total_size(&scratch_dir).await;
    let status = classify_extracted_size(total_bytes);
    if status == SizeStatus::Error {
        warn!(path = %path.display(), total_bytes, "extracted package outside acceptable size window, removing scratch dir");
        let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
        return Err(ArchiveError::OversizedAfter {
            path: path.to_path_buf(),
            size_gib: total_bytes as f64 / GIB as f64,
        });
    }

    info!(
        path = %path.display(),
        scratch = %scratch_dir.display(),
        total_bytes,
        files = files.len(),
        "archive extracted"
    );

    Ok((
        metacam_types::ExtractedPackage {
            root_path: scratch_dir,
            files,
            total_bytes,
            format,
            password_used,
        },
        status,
    ))
}

async fn total_size(root: &Path) -> u64 {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}

pub use metacam_types::ExtractedPackage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_size_bands() {
        assert_eq!(classify_extracted_size(GIB), SizeStatus::Optimal);
        assert_eq!(classify_extracted_size(GIB * 6 / 10), SizeStatus::Warning);
        assert_eq!(classify_extracted_size(GIB / 10), SizeStatus::Error);
        assert_eq!(classify_extracted_size(GIB * 7), SizeStatus::Error);
    }

    #[tokio::test]
    async fn inspect_rejects_files_over_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("huge.zip");
        tokio::fs::write(&file, vec![0u8; 1024]).await.unwrap();

        let config = ArchiveInspectorConfig {
            max_file_size_mb: 0,
            scratch_root: dir.path().join("scratch"),
            ..ArchiveInspectorConfig::default()
        };

        let err = inspect(&file, &config).await.unwrap_err();
        assert!(matches!(err, ArchiveError::OversizedBefore { .. }));
    }

    #[tokio::test]
    async fn inspect_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let config = ArchiveInspectorConfig {
            scratch_root: dir.path().join("scratch"),
            ..ArchiveInspectorConfig::default()
        };

        let err = inspect(&file, &config).await.unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownFormat { .. }));
    }

    #[tokio::test]
    async fn inspect_extracts_a_valid_zip() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pkg.zip");
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::FileOptions::default();
            writer.start_file("metadata.yaml", options).unwrap();
            writer.write_all(b"record:\n  start_time: 0\n").unwrap();
            writer.finish().unwrap();
        }

        let config = ArchiveInspectorConfig {
            scratch_root: dir.path().join("scratch"),
            ..ArchiveInspectorConfig::default()
        };

        // A handful of bytes lands well below the acceptable window, so
        // this exercises the happy extraction path while still expecting
        // the size classification to flag it.
        let err = inspect(&zip_path, &config).await.unwrap_err();
        assert!(matches!(err, ArchiveError::OversizedAfter { .. }));
    }
}
