//! Directory standardization: the first half of the Processing Driver
//! (spec §4.13). Ensures the native binaries see the MetaCam layout at
//! the root they're invoked against, rebinding to a single wrapped
//! subdirectory when the extractor left the package nested one level
//! deep. Never moves anything outside the scratch directory.

use std::path::{Path, PathBuf};

const REQUIRED_DIRS: &[&str] = &["images", "data", "info"];

#[derive(Debug, thiserror::Error)]
pub enum StandardizeError {
    #[error("package at {0} is missing the MetaCam layout at its root or one level below")]
    LayoutNotFound(PathBuf),

    #[error("I/O error inspecting {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Returns the effective package root: `root` itself if the layout is
/// already there, or the sole child directory if `root` turns out to be
/// a wrapped single-subdirectory package.
pub async fn standardize(root: &Path) -> Result<PathBuf, StandardizeError> {
    if has_layout(root).await? {
        return Ok(root.to_path_buf());
    }

    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|source| StandardizeError::Io {
            path: root.to_path_buf(),
            source,
        })?;

    let mut only_child: Option<PathBuf> = None;
    let mut child_count = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| StandardizeError::Io {
            path: root.to_path_buf(),
            source,
        })?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|source| StandardizeError::Io {
                path: entry.path(),
                source,
            })?;
        if !file_type.is_dir() {
            continue;
        }
        child_count += 1;
        only_child = Some(entry.path());
    }

    if child_count == 1
        && let Some(candidate) = only_child
        && has_layout(&candidate).await?
    {
        return Ok(candidate);
    }

    Err(StandardizeError::LayoutNotFound(root.to_path_buf()))
}

async fn has_layout(dir: &Path) -> Result<bool, StandardizeError> {
    for name in REQUIRED_DIRS {
        let path = dir.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => continue,
            Ok(_) => return Ok(false),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(StandardizeError::Io { path, source }),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_layout(root: &Path) {
        for name in REQUIRED_DIRS {
            tokio::fs::create_dir_all(root.join(name)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn root_with_layout_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        make_layout(dir.path()).await;

        let standardized = standardize(dir.path()).await.unwrap();
        assert_eq!(standardized, dir.path());
    }

    #[tokio::test]
    async fn wrapped_single_subdir_is_rebound() {
        let dir = tempfile::tempdir().unwrap();
        let wrapped = dir.path().join("pkg42");
        tokio::fs::create_dir_all(&wrapped).await.unwrap();
        make_layout(&wrapped).await;

        let standardized = standardize(dir.path()).await.unwrap();
        assert_eq!(standardized, wrapped);
    }

    #[tokio::test]
    async fn missing_layout_errors() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("random")).await.unwrap();

        let err = standardize(dir.path()).await.unwrap_err();
        assert!(matches!(err, StandardizeError::LayoutNotFound(_)));
    }
}
