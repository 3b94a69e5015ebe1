//! Multi-location output search (spec §4.13): the CLI binary's actual
//! output directory is one of five conventional locations depending on
//! its version and flags; this walks them in order and stops at the
//! first one containing both required files.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub const COLORIZED_LAS: &str = "colorized.las";
pub const TRANSFORMS_JSON: &str = "transforms.json";

#[derive(Debug, Clone)]
pub struct OutputLocation {
    pub dir: PathBuf,
    pub colorized_las: PathBuf,
    pub transforms_json: PathBuf,
}

/// Builds the five candidate locations in the order spec §4.13 defines.
pub fn candidate_locations(
    configured_out_dir: &Path,
    binary_dir: &Path,
    package_name: &str,
) -> Vec<PathBuf> {
    vec![
        configured_out_dir.join(format!("{package_name}_output")),
        binary_dir
            .join("processed")
            .join("output")
            .join(format!("o_{package_name}_output")),
        binary_dir
            .join("output")
            .join(format!("{package_name}_output")),
        binary_dir.join("output"),
        binary_dir.join("processed").join("output"),
    ]
}

/// Returns the first candidate directory containing both required
/// files, or the union of missing file names if none qualify.
pub async fn search(
    configured_out_dir: &Path,
    binary_dir: &Path,
    package_name: &str,
) -> Result<OutputLocation, Vec<String>> {
    let candidates = candidate_locations(configured_out_dir, binary_dir, package_name);
    let mut ever_found_las = false;
    let mut ever_found_transforms = false;

    for dir in &candidates {
        let exists = tokio::fs::metadata(dir).await.is_ok();
        info!(dir = %dir.display(), exists, "output search: scanning location");
        if !exists {
            continue;
        }

        if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
            let mut names = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            debug!(dir = %dir.display(), entries = ?names, "output search: directory listing");
        }

        let las = dir.join(COLORIZED_LAS);
        let transforms = dir.join(TRANSFORMS_JSON);
        let has_las = tokio::fs::metadata(&las).await.is_ok();
        let has_transforms = tokio::fs::metadata(&transforms).await.is_ok();
        ever_found_las |= has_las;
        ever_found_transforms |= has_transforms;

        info!(
            dir = %dir.display(),
            has_las,
            has_transforms,
            "output search: pattern match attempt"
        );

        if has_las && has_transforms {
            info!(dir = %dir.display(), "output search: succeeded");
            return Ok(OutputLocation {
                dir: dir.clone(),
                colorized_las: las,
                transforms_json: transforms,
            });
        }
    }

    let mut missing = Vec::new();
    if !ever_found_las {
        missing.push(COLORIZED_LAS.to_string());
    }
    if !ever_found_transforms {
        missing.push(TRANSFORMS_JSON.to_string());
    }
    info!(missing = ?missing, "output search: failed across all locations");
    Err(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_first_matching_location() {
        let dir = tempfile::tempdir().unwrap();
        let configured_out = dir.path().join("out");
        let binary_dir = dir.path().join("bin");
        tokio::fs::create_dir_all(&configured_out).await.unwrap();
        tokio::fs::create_dir_all(&binary_dir).await.unwrap();

        let target = configured_out.join("pkg42_output");
        tokio::fs::create_dir_all(&target).await.unwrap();
        tokio::fs::write(target.join(COLORIZED_LAS), b"las").await.unwrap();
        tokio::fs::write(target.join(TRANSFORMS_JSON), b"{}").await.unwrap();

        let found = search(&configured_out, &binary_dir, "pkg42").await.unwrap();
        assert_eq!(found.dir, target);
    }

    #[tokio::test]
    async fn reports_missing_file_when_only_one_present() {
        let dir = tempfile::tempdir().unwrap();
        let configured_out = dir.path().join("out");
        let binary_dir = dir.path().join("bin");
        tokio::fs::create_dir_all(&configured_out).await.unwrap();
        let output_dir = binary_dir.join("output");
        tokio::fs::create_dir_all(&output_dir).await.unwrap();
        tokio::fs::write(output_dir.join(COLORIZED_LAS), b"las").await.unwrap();

        let err = search(&configured_out, &binary_dir, "pkg42").await.unwrap_err();
        assert_eq!(err, vec![TRANSFORMS_JSON.to_string()]);
    }

    #[tokio::test]
    async fn falls_through_to_later_locations() {
        let dir = tempfile::tempdir().unwrap();
        let configured_out = dir.path().join("out");
        let binary_dir = dir.path().join("bin");
        tokio::fs::create_dir_all(&configured_out).await.unwrap();

        let target = binary_dir
            .join("processed")
            .join("output")
            .join("o_pkg42_output");
        tokio::fs::create_dir_all(&target).await.unwrap();
        tokio::fs::write(target.join(COLORIZED_LAS), b"las").await.unwrap();
        tokio::fs::write(target.join(TRANSFORMS_JSON), b"{}").await.unwrap();

        let found = search(&configured_out, &binary_dir, "pkg42").await.unwrap();
        assert_eq!(found.dir, target);
    }
}
